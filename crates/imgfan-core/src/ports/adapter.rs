//! Upload adapter port.
//!
//! Each hosting backend is an external collaborator behind this trait:
//! given a local file plus credentials, it returns a raw result or a typed
//! failure. Wire-level protocol details never leak past the adapter.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{ItemId, RawUploadResult, ServiceId};
use crate::errors::UploadError;
use crate::events::ProgressPhase;

/// Everything an adapter needs for one upload attempt.
///
/// Credentials are carried as an opaque JSON object: their shape is
/// backend-specific and the core never inspects it.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// The queue item this attempt belongs to.
    pub item_id: ItemId,
    /// Absolute path of the local file.
    pub file_path: PathBuf,
    /// Display file name sent to the backend.
    pub file_name: String,
    /// Backend-specific credentials/config, read live at dispatch time.
    pub credentials: Value,
}

/// Sink for per-attempt progress ticks.
///
/// One sink instance is scoped to a single `(item, service)` pair, so
/// adapters report bare numbers and the engine attributes them.
pub trait ProgressSink: Send + Sync {
    /// Report a progress tick.
    fn report(
        &self,
        progress: u8,
        phase: ProgressPhase,
        bytes_uploaded: Option<u64>,
        total_bytes: Option<u64>,
    );
}

/// A hosting backend.
///
/// Implementations must be safe to call concurrently; the fan-out engine
/// dispatches every selected adapter for an item at once.
#[async_trait]
pub trait UploadAdapter: Send + Sync {
    /// The backend this adapter talks to.
    fn service_id(&self) -> ServiceId;

    /// Upload one file.
    ///
    /// Failures must come back as [`UploadError`], never as a panic: a
    /// panicking adapter would take its siblings' executor down with it.
    async fn upload(
        &self,
        request: &UploadRequest,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<RawUploadResult, UploadError>;

    /// Verify the stored credential without uploading anything.
    ///
    /// Returns the authenticated username when the backend exposes one.
    async fn test_connection(&self, credentials: &Value) -> Result<Option<String>, UploadError> {
        let _ = credentials;
        Ok(None)
    }
}

/// A sink that drops every tick, for adapters probed outside a queue item.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report(
        &self,
        _progress: u8,
        _phase: ProgressPhase,
        _bytes_uploaded: Option<u64>,
        _total_bytes: Option<u64>,
    ) {
    }
}
