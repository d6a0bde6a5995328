//! Core domain types.
//!
//! Pure data types with no infrastructure dependencies. Everything here is
//! Clone + Debug + Serialize + Deserialize so queue snapshots and history
//! rows can cross FFI boundaries (Tauri events, CLI output) unchanged.

mod history;
mod sync;
mod upload;

pub use history::{
    HistoryItem, LinkCheckErrorType, LinkCheckStatus, LinkCheckSummary,
};
pub use sync::{
    DownloadPolicy, SyncDataKind, SyncOutcome, SyncReport, SyncStatus, UploadPolicy, WebDavProfile,
};
pub use upload::{
    ItemId, ItemStatus, MultiUploadResult, QueueItem, RawUploadResult, ResultStatus, ServiceId,
    ServiceProgress, ServiceProgressUpdate, ServiceResult, ServiceStatus,
};
