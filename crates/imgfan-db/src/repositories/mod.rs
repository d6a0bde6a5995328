//! Repository implementations using `SQLite`.
//!
//! These implementations encapsulate all SQL queries and database access.
//! The `SqlitePool` is confined to this crate and never exposed through
//! the port trait signatures.

mod sqlite_history_repository;

pub use sqlite_history_repository::SqliteHistoryRepository;
