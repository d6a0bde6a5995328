//! Fan-out upload engine for imgfan.
//!
//! - `manager` - multi-destination dispatch, aggregation and retries
//! - `linkcheck` - bulk link validity probing and temp-file hygiene
//! - `media` - header-only image metadata probing
//! - `progress` - throttled progress event forwarding

#![deny(unsafe_code)]

// Re-export core types for convenience
pub use imgfan_core::domain::{
    ItemId, ItemStatus, MultiUploadResult, QueueItem, RawUploadResult, ServiceId, ServiceResult,
    ServiceStatus,
};
pub use imgfan_core::ports::{ProgressSink, UploadAdapter, UploadRequest};

mod manager;
pub use manager::{
    AdapterRegistry, RetryReport, UploadManager, UploadManagerDeps, build_upload_manager,
};

pub mod linkcheck;
pub mod media;

mod progress;
pub use progress::{EmitterProgressSink, ProgressThrottle};

// Scripted adapter fixtures for engine tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
