//! Session store implementations.
//!
//! The store holds one JSON-serializable state blob per (user_id, session_id)
//! pair with a configurable TTL. The conversation core reads a session once
//! per turn and writes it back at most once; everything in between happens on
//! an in-memory copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::OptionalExtension;
use tracing::{debug, info};

use kirana_core::error::KiranaError;
use kirana_core::types::Session;

use crate::db::Database;

/// Abstract session persistence.
///
/// `get` returns `None` both for sessions that never existed and for
/// sessions past their TTL; callers treat `None` as "start fresh". `save`
/// is atomic at the granularity of one session blob.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a live (non-expired) session.
    async fn get(&self, user_id: &str, session_id: &str)
        -> Result<Option<Session>, KiranaError>;

    /// Persist the full session state, replacing any previous blob.
    async fn save(&self, session: &Session) -> Result<(), KiranaError>;

    /// Remove a session. Removing a missing session is not an error.
    async fn delete(&self, user_id: &str, session_id: &str) -> Result<(), KiranaError>;
}

// =============================================================================
// SqliteSessionStore
// =============================================================================

/// SQLite-backed session store. One row per session, state as a JSON blob.
pub struct SqliteSessionStore {
    db: Arc<Database>,
    ttl_minutes: u32,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<Database>, ttl_minutes: u32) -> Self {
        Self { db, ttl_minutes }
    }

    fn expiry_cutoff(&self) -> i64 {
        (Utc::now() - Duration::minutes(i64::from(self.ttl_minutes))).timestamp()
    }

    /// Delete all rows past the TTL. Returns the number of rows removed.
    ///
    /// Expired rows are already invisible to `get`; this reclaims the space.
    pub fn purge_expired(&self) -> Result<usize, KiranaError> {
        let cutoff = self.expiry_cutoff();
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sessions WHERE updated_at < ?1",
                rusqlite::params![cutoff],
            )
            .map_err(|e| KiranaError::Storage(format!("Failed to purge sessions: {}", e)))
        })?;
        if removed > 0 {
            info!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, KiranaError> {
        let cutoff = self.expiry_cutoff();
        let blob: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT state FROM sessions
                 WHERE user_id = ?1 AND session_id = ?2 AND updated_at >= ?3",
                rusqlite::params![user_id, session_id, cutoff],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| KiranaError::Storage(format!("Failed to load session: {}", e)))
        })?;

        match blob {
            Some(state) => {
                let session: Session = serde_json::from_str(&state)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session: &Session) -> Result<(), KiranaError> {
        let state = serde_json::to_string(session)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (user_id, session_id, state, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, session_id) DO UPDATE SET
                     state = excluded.state,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    session.user_id,
                    session.session_id,
                    state,
                    session.updated_at.timestamp(),
                ],
            )
            .map_err(|e| KiranaError::Storage(format!("Failed to save session: {}", e)))?;
            Ok(())
        })?;
        debug!(
            user_id = %session.user_id,
            session_id = %session.session_id,
            "Session saved"
        );
        Ok(())
    }

    async fn delete(&self, user_id: &str, session_id: &str) -> Result<(), KiranaError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sessions WHERE user_id = ?1 AND session_id = ?2",
                rusqlite::params![user_id, session_id],
            )
            .map_err(|e| KiranaError::Storage(format!("Failed to delete session: {}", e)))?;
            Ok(())
        })
    }
}

// =============================================================================
// MemorySessionStore
// =============================================================================

/// In-memory session store with the same TTL semantics as the SQLite store.
/// Used by tests and the single-user REPL.
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<(String, String), Session>>,
    ttl_minutes: u32,
}

impl MemorySessionStore {
    pub fn new(ttl_minutes: u32) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl_minutes,
        }
    }

    fn is_expired(&self, session: &Session) -> bool {
        let age = Utc::now().signed_duration_since(session.updated_at);
        age > Duration::minutes(i64::from(self.ttl_minutes))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, KiranaError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| KiranaError::Storage(format!("Session lock poisoned: {}", e)))?;
        let key = (user_id.to_string(), session_id.to_string());
        match sessions.get(&key) {
            Some(session) if self.is_expired(session) => {
                sessions.remove(&key);
                Ok(None)
            }
            Some(session) => Ok(Some(session.clone())),
            None => Ok(None),
        }
    }

    async fn save(&self, session: &Session) -> Result<(), KiranaError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| KiranaError::Storage(format!("Session lock poisoned: {}", e)))?;
        sessions.insert(
            (session.user_id.clone(), session.session_id.clone()),
            session.clone(),
        );
        Ok(())
    }

    async fn delete(&self, user_id: &str, session_id: &str) -> Result<(), KiranaError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| KiranaError::Storage(format!("Session lock poisoned: {}", e)))?;
        sessions.remove(&(user_id.to_string(), session_id.to_string()));
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
