//! WebDAV backup and reconciliation for imgfan.
//!
//! - `webdav` - file-level WebDAV client behind the `RemoteStore` port
//! - `engine` - policy-driven reconciliation of settings and history

#![deny(unsafe_code)]

// Re-export core types for convenience
pub use imgfan_core::domain::{
    DownloadPolicy, SyncDataKind, SyncOutcome, SyncReport, SyncStatus, UploadPolicy, WebDavProfile,
};
pub use imgfan_core::ports::{RemoteStore, RemoteStoreError};

mod engine;
pub use engine::{SyncEngine, SyncEngineDeps, SyncError};

mod webdav;
pub use webdav::WebDavStore;
