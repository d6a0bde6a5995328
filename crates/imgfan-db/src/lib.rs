//! `SQLite`-backed persistence for the upload history.
//!
//! Owns schema setup and the [`SqliteHistoryRepository`] implementation of
//! the `HistoryRepository` port from `imgfan-core`.

#![deny(unsafe_code)]

pub mod repositories;
pub mod setup;

pub use repositories::SqliteHistoryRepository;

pub use setup::setup_database;
#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;
