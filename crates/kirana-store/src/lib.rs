//! Kirana session persistence - SQLite-backed and in-memory session stores.
//!
//! Provides a WAL-mode SQLite database with migrations and the
//! `SessionStore` trait the conversation orchestrator writes through.
//! Sessions are stored as one JSON state blob per (user_id, session_id)
//! with TTL-based expiry.

pub mod db;
pub mod migrations;
pub mod store;

pub use db::Database;
pub use store::{MemorySessionStore, SessionStore, SqliteSessionStore};
