//! Database schema migrations.
//!
//! Applies the initial schema: the sessions table plus the
//! schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use kirana_core::error::KiranaError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental
/// changes.
pub fn run_migrations(conn: &Connection) -> Result<(), KiranaError> {
    // Create the migrations tracking table first.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| KiranaError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| KiranaError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: sessions_schema");
    }

    Ok(())
}

/// Version 1: sessions table.
///
/// One row per (user_id, session_id); the full conversation state is a JSON
/// blob in `state`. `updated_at` drives TTL expiry.
fn apply_v1(conn: &Connection) -> Result<(), KiranaError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            user_id     TEXT NOT NULL,
            session_id  TEXT NOT NULL,
            state       TEXT NOT NULL,
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (user_id, session_id)
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_updated_at
            ON sessions (updated_at);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'sessions_schema');
        ",
    )
    .map_err(|e| KiranaError::Storage(format!("Failed to apply v1 schema: {}", e)))?;

    Ok(())
}
