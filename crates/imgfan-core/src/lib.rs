//! Core domain and in-memory engines of the imgfan upload pipeline.
//!
//! This crate holds everything that is pure or in-memory: the data model,
//! the closed error taxonomy, the typed event union, the port traits that
//! infrastructure crates implement, the link generator, the upload queue
//! ledger, the TTL/LRU caches and the file-backed settings store.
//!
//! Infrastructure lives elsewhere: `imgfan-db` (SQLite history store),
//! `imgfan-upload` (fan-out + retry engine), `imgfan-sync` (WebDAV
//! reconciliation).

pub mod cache;
pub mod domain;
pub mod errors;
pub mod events;
pub mod link;
pub mod ports;
pub mod queue;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{
    DownloadPolicy, HistoryItem, ItemId, ItemStatus, LinkCheckErrorType, LinkCheckStatus,
    LinkCheckSummary, MultiUploadResult, QueueItem, RawUploadResult, ResultStatus, ServiceId,
    ServiceProgress, ServiceProgressUpdate, ServiceResult, ServiceStatus, SyncDataKind,
    SyncOutcome, SyncReport, SyncStatus, UploadPolicy, WebDavProfile,
};
pub use errors::{AppError, AppResult, StorageError, UploadError};
pub use events::{AppEvent, ProgressPhase};
pub use link::{LinkConfig, LinkOutputMode, generate, original_link};
pub use ports::{
    AppEventEmitter, BroadcastEmitter, DEFAULT_PAGE_SIZE, HistoryPage, HistoryRepository,
    HistoryScan, ImportStrategy, NoopEmitter, PageRequest, ProgressSink, RemoteStore,
    RemoteStoreError, SearchRequest, UploadAdapter, UploadRequest,
};
pub use queue::{ItemUpdate, UploadQueue};
pub use settings::{
    DEFAULT_HISTORY_PAGE_SIZE, DEFAULT_MAX_CONCURRENT_UPLOADS, JsonSettingsStore, Settings,
    SettingsError, SettingsUpdate, validate_settings,
};
