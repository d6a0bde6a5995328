//! Canonical event union for all cross-window events.
//!
//! This module is the single source of truth for events crossing window or
//! adapter boundaries: upload progress streamed to the queue view, history
//! mutations that other windows must patch into their caches, and cache
//! invalidation broadcasts.
//!
//! # Wire Format
//!
//! Events are serialized with a `type` tag for TypeScript compatibility:
//!
//! ```json
//! { "type": "history_deleted", "ids": ["..."] }
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::{ItemId, ServiceId, SyncDataKind, SyncOutcome};
use crate::errors::UploadError;

/// Phase of one destination's upload, as reported over the progress channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    /// Reading/encoding the local file.
    Preparing,
    /// Bytes on the wire.
    Uploading,
    /// Backend post-processing.
    Processing,
    /// Done.
    Complete,
}

/// Closed union of events emitted by the core.
///
/// Consumers subscribe explicitly; there is no implicit dependency
/// tracking. Windows that mutate history broadcast the matching event so
/// every other window either patches its cache (deletes, by id) or marks
/// it stale (generic updates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    // ========== Upload progress ==========
    /// Progress tick for one (item, service) pair.
    UploadProgress {
        /// The queue item.
        #[serde(rename = "itemId")]
        item_id: ItemId,
        /// The destination this tick belongs to.
        service: ServiceId,
        /// Progress percentage, 0-100.
        progress: u8,
        /// Current phase.
        phase: ProgressPhase,
        /// Bytes on the wire so far, when the adapter knows.
        #[serde(rename = "bytesUploaded", skip_serializing_if = "Option::is_none")]
        bytes_uploaded: Option<u64>,
        /// Total payload size, when the adapter knows.
        #[serde(rename = "totalBytes", skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
    },

    /// One destination settled successfully.
    UploadSucceeded {
        /// The queue item.
        #[serde(rename = "itemId")]
        item_id: ItemId,
        /// The destination that settled.
        service: ServiceId,
        /// Link generated for the destination.
        link: String,
    },

    /// One destination settled with a failure.
    UploadFailed {
        /// The queue item.
        #[serde(rename = "itemId")]
        item_id: ItemId,
        /// The destination that settled.
        service: ServiceId,
        /// The typed failure.
        error: UploadError,
    },

    // ========== Queue ==========
    /// An item entered the queue.
    QueueItemAdded {
        /// The new item.
        #[serde(rename = "itemId")]
        item_id: ItemId,
    },

    /// An item's ledger changed (status or per-service progress).
    QueueItemUpdated {
        /// The changed item.
        #[serde(rename = "itemId")]
        item_id: ItemId,
    },

    /// An item left the queue.
    QueueItemRemoved {
        /// The removed item.
        #[serde(rename = "itemId")]
        item_id: ItemId,
    },

    /// The queue was cleared (fully or of completed items).
    QueueCleared,

    // ========== History ==========
    /// History rows were deleted; other windows drop these ids from their
    /// caches.
    HistoryDeleted {
        /// Ids of the deleted rows.
        ids: Vec<ItemId>,
    },

    /// The whole history store was cleared.
    HistoryCleared,

    /// A history row changed in a way not worth diffing; caches reload on
    /// next read.
    HistoryUpdated,

    // ========== Config / cache ==========
    /// Settings changed on disk.
    ConfigUpdated,

    /// A TTL cache entry was invalidated; same-keyed caches in other
    /// windows drop their entry.
    CacheInvalidated {
        /// Cache key.
        key: String,
    },

    // ========== Sync ==========
    /// A sync run started.
    SyncStarted {
        /// The data kind being reconciled.
        kind: SyncDataKind,
    },

    /// A sync run finished.
    SyncFinished {
        /// The data kind that was reconciled.
        kind: SyncDataKind,
        /// How it went.
        outcome: SyncOutcome,
    },
}

impl AppEvent {
    /// Create an upload progress event.
    #[must_use]
    pub const fn upload_progress(
        item_id: ItemId,
        service: ServiceId,
        progress: u8,
        phase: ProgressPhase,
    ) -> Self {
        Self::UploadProgress {
            item_id,
            service,
            progress,
            phase,
            bytes_uploaded: None,
            total_bytes: None,
        }
    }

    /// Create an upload succeeded event.
    pub fn upload_succeeded(item_id: ItemId, service: ServiceId, link: impl Into<String>) -> Self {
        Self::UploadSucceeded {
            item_id,
            service,
            link: link.into(),
        }
    }

    /// Create an upload failed event.
    #[must_use]
    pub const fn upload_failed(item_id: ItemId, service: ServiceId, error: UploadError) -> Self {
        Self::UploadFailed {
            item_id,
            service,
            error,
        }
    }

    /// Create a history deleted event.
    #[must_use]
    pub const fn history_deleted(ids: Vec<ItemId>) -> Self {
        Self::HistoryDeleted { ids }
    }

    /// Create a cache invalidated event.
    pub fn cache_invalidated(key: impl Into<String>) -> Self {
        Self::CacheInvalidated { key: key.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format_has_type_tag() {
        let event = AppEvent::history_deleted(vec![ItemId::new()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "history_deleted");
        assert!(json["ids"].is_array());
    }

    #[test]
    fn test_progress_event_camel_case_fields() {
        let event = AppEvent::UploadProgress {
            item_id: ItemId::new(),
            service: ServiceId::new("a"),
            progress: 42,
            phase: ProgressPhase::Uploading,
            bytes_uploaded: Some(1024),
            total_bytes: Some(4096),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "upload_progress");
        assert!(json.get("itemId").is_some());
        assert!(json.get("bytesUploaded").is_some());
        assert!(json.get("bytes_uploaded").is_none());
    }

    #[test]
    fn test_event_roundtrip() {
        let event = AppEvent::upload_failed(
            ItemId::new(),
            ServiceId::new("b"),
            UploadError::network("down"),
        );
        let json = serde_json::to_string(&event).unwrap();
        let parsed: AppEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
