//! Durable upload history types.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::upload::{ItemId, ServiceId, ServiceResult};

/// Classified outcome of probing one shared link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkCheckErrorType {
    /// The link answered with 2xx.
    Success,
    /// 4xx: deleted or access denied; re-upload from another backend.
    Http4xx,
    /// 5xx: backend temporarily down; retry later.
    Http5xx,
    /// The probe timed out.
    Timeout,
    /// Connection-level failure.
    Network,
}

/// Result of the most recent validity probe of an item's generated link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCheckStatus {
    /// Whether the link answered successfully.
    pub valid: bool,
    /// HTTP status code, when a response arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Classified failure kind.
    pub error_type: LinkCheckErrorType,
    /// Human-readable fix suggestion for broken links.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Probe round-trip time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// When the probe ran (unix millis).
    pub checked_at: i64,
}

/// Aggregate of a probe across all of one item's per-service links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCheckSummary {
    /// Links probed.
    pub total: u32,
    /// Links that answered successfully.
    pub valid: u32,
    /// Links that failed the probe.
    pub broken: u32,
    /// When the probe ran (unix millis).
    pub checked_at: i64,
}

/// The durable record of one completed upload, independent of the queue.
///
/// Created once on the first successful upload of a file; the id never
/// changes afterwards. The retry engine and background metadata jobs
/// mutate rows in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    /// Immutable id, generated once.
    pub id: ItemId,
    /// Record timestamp (unix millis). Last-writer-wins merges compare this,
    /// never wall-clock import time.
    pub timestamp: i64,
    /// Original local file name.
    pub local_file_name: String,
    /// Local path the file was uploaded from, when still known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// The destination whose URL is the canonical shareable link.
    pub primary_service: ServiceId,
    /// One settled entry per attempted service; service ids are unique
    /// within this array.
    pub results: Vec<ServiceResult>,
    /// The link shown/copied to the user (may be proxy-prefixed).
    pub generated_link: String,
    /// Outcome of the most recent link probe, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_check_status: Option<LinkCheckStatus>,
    /// Aggregate of the most recent link probe, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_check_summary: Option<LinkCheckSummary>,
    /// Image width in pixels, patched in by the metadata fixer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Image height in pixels, patched in by the metadata fixer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl HistoryItem {
    /// Create a record stamped with the current time.
    pub fn new(
        id: ItemId,
        local_file_name: impl Into<String>,
        file_path: Option<String>,
        primary_service: ServiceId,
        results: Vec<ServiceResult>,
        generated_link: impl Into<String>,
    ) -> Self {
        Self {
            id,
            timestamp: Utc::now().timestamp_millis(),
            local_file_name: local_file_name.into(),
            file_path,
            primary_service,
            results,
            generated_link: generated_link.into(),
            link_check_status: None,
            link_check_summary: None,
            width: None,
            height: None,
        }
    }

    /// Replace the entry for `result.service`, or append when absent.
    ///
    /// Keeps the one-entry-per-service invariant; other entries are left
    /// byte-identical.
    pub fn upsert_result(&mut self, result: ServiceResult) {
        match self
            .results
            .iter_mut()
            .find(|r| r.service == result.service)
        {
            Some(existing) => *existing = result,
            None => self.results.push(result),
        }
    }

    /// The settled entry for one service, if it was ever attempted.
    #[must_use]
    pub fn result_for(&self, service: &ServiceId) -> Option<&ServiceResult> {
        self.results.iter().find(|r| &r.service == service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::upload::RawUploadResult;
    use crate::errors::UploadError;

    fn record() -> HistoryItem {
        HistoryItem::new(
            ItemId::new(),
            "photo.png",
            Some("/tmp/photo.png".to_string()),
            ServiceId::new("a"),
            vec![
                ServiceResult::success(
                    ServiceId::new("a"),
                    RawUploadResult::with_url("https://a/x.png"),
                ),
                ServiceResult::failure(ServiceId::new("b"), UploadError::network("down")),
            ],
            "https://a/x.png",
        )
    }

    #[test]
    fn test_upsert_replaces_existing_entry() {
        let mut item = record();
        let before_a = item.result_for(&ServiceId::new("a")).cloned().unwrap();

        item.upsert_result(ServiceResult::success(
            ServiceId::new("b"),
            RawUploadResult::with_url("https://b/x.png"),
        ));

        assert_eq!(item.results.len(), 2);
        assert!(item.result_for(&ServiceId::new("b")).unwrap().is_success());
        // Sibling entry untouched.
        assert_eq!(item.result_for(&ServiceId::new("a")), Some(&before_a));
    }

    #[test]
    fn test_upsert_appends_new_service() {
        let mut item = record();
        item.upsert_result(ServiceResult::success(
            ServiceId::new("c"),
            RawUploadResult::with_url("https://c/x.png"),
        ));
        assert_eq!(item.results.len(), 3);
    }

    #[test]
    fn test_serde_camel_case_keys() {
        let json = serde_json::to_value(record()).unwrap();
        assert!(json.get("localFileName").is_some());
        assert!(json.get("primaryService").is_some());
        assert!(json.get("generatedLink").is_some());
        assert!(json.get("local_file_name").is_none());
    }
}
