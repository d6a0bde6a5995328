//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the core expects from infrastructure. They
//! contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` or `reqwest` types in any signature
//! - Repository traits are minimal and CRUD-focused
//! - Adapter traits are intent-based (bytes + credentials in, typed
//!   result or typed failure out)

pub mod adapter;
pub mod event_emitter;
pub mod history;
pub mod remote_store;

pub use adapter::{NoopProgressSink, ProgressSink, UploadAdapter, UploadRequest};
pub use event_emitter::{AppEventEmitter, BroadcastEmitter, NoopEmitter};
pub use history::{
    HistoryPage, HistoryRepository, HistoryScan, ImportStrategy, PageRequest, SearchRequest,
    DEFAULT_PAGE_SIZE,
};
pub use remote_store::{RemoteStore, RemoteStoreError};
