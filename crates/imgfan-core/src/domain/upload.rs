//! Upload queue and fan-out result types.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::UploadError;

/// Unique identifier of one in-flight upload item.
///
/// The same id keys the durable history row created on first success, so
/// retries can find the row they need to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier of a hosting backend ("weibo", "r2", "smms", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    /// Create a service id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Lifecycle of one destination within an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Waiting for the adapter call to start.
    Pending,
    /// Adapter call in flight.
    Uploading,
    /// Terminal: the backend accepted the file.
    Success,
    /// Terminal: the adapter reported a failure.
    Error,
}

impl ServiceStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Lifecycle of a whole queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Queued, nothing dispatched yet.
    Pending,
    /// At least one destination is in flight.
    Uploading,
    /// Terminal: at least one destination succeeded.
    Success,
    /// Terminal: every destination failed.
    Error,
}

impl ItemStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// One destination's independent progress within a queue item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProgress {
    /// The destination this entry tracks.
    pub service: ServiceId,
    /// Progress percentage, 0-100.
    pub progress: u8,
    /// Current status.
    pub status: ServiceStatus,
    /// Shareable link once the destination succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Terminal error, if the destination failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UploadError>,
}

impl ServiceProgress {
    /// Create a fresh pending entry for a destination.
    pub fn pending(service: ServiceId) -> Self {
        Self {
            service,
            progress: 0,
            status: ServiceStatus::Pending,
            link: None,
            error: None,
        }
    }

    /// Apply a partial update, leaving unmentioned fields untouched.
    pub fn apply(&mut self, update: &ServiceProgressUpdate) {
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(ref link) = update.link {
            self.link = Some(link.clone());
        }
        if let Some(ref error) = update.error {
            self.error = Some(error.clone());
        }
    }
}

/// Partial update for one destination's progress.
///
/// `None` fields are left untouched, so a progress tick never erases a
/// previously stored link or error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProgressUpdate {
    /// New progress percentage, if changed.
    pub progress: Option<u8>,
    /// New status, if changed.
    pub status: Option<ServiceStatus>,
    /// Link to store, if the destination settled successfully.
    pub link: Option<String>,
    /// Error to store, if the destination settled with a failure.
    pub error: Option<UploadError>,
}

impl ServiceProgressUpdate {
    /// Update carrying only a progress tick.
    #[must_use]
    pub const fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            status: None,
            link: None,
            error: None,
        }
    }

    /// Terminal success update.
    pub fn succeeded(link: impl Into<String>) -> Self {
        Self {
            progress: Some(100),
            status: Some(ServiceStatus::Success),
            link: Some(link.into()),
            error: None,
        }
    }

    /// Terminal failure update.
    #[must_use]
    pub fn failed(error: UploadError) -> Self {
        Self {
            progress: None,
            status: Some(ServiceStatus::Error),
            link: None,
            error: Some(error),
        }
    }

    /// Update marking the destination as in flight.
    #[must_use]
    pub const fn uploading() -> Self {
        Self {
            progress: None,
            status: Some(ServiceStatus::Uploading),
            link: None,
            error: None,
        }
    }
}

/// One file's in-flight upload ledger across all selected destinations.
///
/// Owned exclusively by the queue while in flight; external components
/// only see cloned snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Item id, shared with the eventual history row.
    pub id: ItemId,
    /// Display file name.
    pub file_name: String,
    /// Absolute path of the local file.
    pub file_path: String,
    /// Destinations selected for this item, in caller-supplied order.
    pub enabled_services: Vec<ServiceId>,
    /// Per-destination progress, one entry per enabled service.
    pub service_progress: IndexMap<ServiceId, ServiceProgress>,
    /// Derived overall status.
    pub status: ItemStatus,
}

impl QueueItem {
    /// Create a pending item with one progress entry per destination.
    pub fn new(
        id: ItemId,
        file_name: impl Into<String>,
        file_path: impl Into<String>,
        enabled_services: Vec<ServiceId>,
    ) -> Self {
        let service_progress = enabled_services
            .iter()
            .map(|s| (s.clone(), ServiceProgress::pending(s.clone())))
            .collect();

        Self {
            id,
            file_name: file_name.into(),
            file_path: file_path.into(),
            enabled_services,
            service_progress,
            status: ItemStatus::Pending,
        }
    }

    /// Recompute the overall status from the per-service entries.
    ///
    /// Terminal only once every enabled service is terminal; success if at
    /// least one destination succeeded (partial success is still success at
    /// the item level).
    #[must_use]
    pub fn derived_status(&self) -> ItemStatus {
        let entries: Vec<&ServiceProgress> = self
            .enabled_services
            .iter()
            .filter_map(|s| self.service_progress.get(s))
            .collect();

        if entries.iter().any(|p| p.status == ServiceStatus::Uploading) {
            return ItemStatus::Uploading;
        }
        if !entries.iter().all(|p| p.status.is_terminal()) {
            if entries.iter().any(|p| p.status.is_terminal()) {
                // Some settled, some still pending dispatch.
                return ItemStatus::Uploading;
            }
            return ItemStatus::Pending;
        }
        if entries.iter().any(|p| p.status == ServiceStatus::Success) {
            ItemStatus::Success
        } else {
            ItemStatus::Error
        }
    }

    /// Destinations currently in a terminal error state.
    #[must_use]
    pub fn failed_services(&self) -> Vec<ServiceId> {
        self.enabled_services
            .iter()
            .filter(|s| {
                self.service_progress
                    .get(*s)
                    .is_some_and(|p| p.status == ServiceStatus::Error)
            })
            .cloned()
            .collect()
    }
}

/// Raw output of one adapter call: what the backend handed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUploadResult {
    /// Canonical URL of the uploaded file on this backend.
    pub url: String,
    /// Backend object key, if the backend exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    /// Entity tag, if the backend returns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl RawUploadResult {
    /// Result carrying only a URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_key: None,
            etag: None,
        }
    }
}

/// Success/failure discriminator of a settled destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// The destination accepted the file.
    Success,
    /// The destination failed.
    Error,
}

/// One attempted destination's settled outcome.
///
/// Shared between the uploader's aggregate and the history row's `results`
/// array; a history row holds at most one entry per service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResult {
    /// The destination.
    pub service: ServiceId,
    /// Settled outcome.
    pub status: ResultStatus,
    /// Raw backend result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RawUploadResult>,
    /// Typed failure on error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UploadError>,
}

impl ServiceResult {
    /// Create a success entry.
    pub const fn success(service: ServiceId, result: RawUploadResult) -> Self {
        Self {
            service,
            status: ResultStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    /// Create a failure entry.
    pub const fn failure(service: ServiceId, error: UploadError) -> Self {
        Self {
            service,
            status: ResultStatus::Error,
            result: None,
            error: Some(error),
        }
    }

    /// Whether this entry settled successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Aggregate of one fan-out: every attempted destination plus the chosen
/// primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiUploadResult {
    /// The item this aggregate belongs to.
    pub item_id: ItemId,
    /// One settled entry per attempted destination.
    pub results: Vec<ServiceResult>,
    /// The destination whose URL is the item's canonical link, if any
    /// destination succeeded.
    pub primary_service: Option<ServiceId>,
}

impl MultiUploadResult {
    /// Whether at least one destination succeeded.
    #[must_use]
    pub fn any_success(&self) -> bool {
        self.results.iter().any(ServiceResult::is_success)
    }

    /// The primary destination's raw result, if a primary exists.
    #[must_use]
    pub fn primary_result(&self) -> Option<&RawUploadResult> {
        let primary = self.primary_service.as_ref()?;
        self.results
            .iter()
            .find(|r| &r.service == primary)
            .and_then(|r| r.result.as_ref())
    }

    /// Choose the primary destination.
    ///
    /// Prefers `preferred` when it succeeded, otherwise the first success in
    /// the caller-supplied order, otherwise none.
    #[must_use]
    pub fn select_primary(
        results: &[ServiceResult],
        preferred: Option<&ServiceId>,
    ) -> Option<ServiceId> {
        if let Some(pref) = preferred {
            if results
                .iter()
                .any(|r| &r.service == pref && r.is_success())
            {
                return Some(pref.clone());
            }
        }
        results
            .iter()
            .find(|r| r.is_success())
            .map(|r| r.service.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_abc() -> QueueItem {
        QueueItem::new(
            ItemId::new(),
            "photo.png",
            "/tmp/photo.png",
            vec!["a".into(), "b".into(), "c".into()],
        )
    }

    #[test]
    fn test_new_item_has_one_entry_per_service() {
        let item = item_abc();
        assert_eq!(item.service_progress.len(), 3);
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(
            item.service_progress
                .values()
                .all(|p| p.status == ServiceStatus::Pending)
        );
    }

    #[test]
    fn test_derived_status_partial_success_is_success() {
        let mut item = item_abc();
        item.service_progress[&ServiceId::new("a")]
            .apply(&ServiceProgressUpdate::succeeded("https://a/x.png"));
        item.service_progress[&ServiceId::new("b")]
            .apply(&ServiceProgressUpdate::failed(UploadError::network("down")));
        item.service_progress[&ServiceId::new("c")]
            .apply(&ServiceProgressUpdate::succeeded("https://c/x.png"));

        assert_eq!(item.derived_status(), ItemStatus::Success);
    }

    #[test]
    fn test_derived_status_not_terminal_until_all_settle() {
        let mut item = item_abc();
        item.service_progress[&ServiceId::new("a")]
            .apply(&ServiceProgressUpdate::succeeded("https://a/x.png"));

        assert_eq!(item.derived_status(), ItemStatus::Uploading);
    }

    #[test]
    fn test_derived_status_all_failed_is_error() {
        let mut item = item_abc();
        for s in ["a", "b", "c"] {
            item.service_progress[&ServiceId::new(s)]
                .apply(&ServiceProgressUpdate::failed(UploadError::network("down")));
        }
        assert_eq!(item.derived_status(), ItemStatus::Error);
        assert_eq!(item.failed_services().len(), 3);
    }

    #[test]
    fn test_progress_tick_keeps_link_and_error() {
        let mut progress = ServiceProgress::pending(ServiceId::new("a"));
        progress.apply(&ServiceProgressUpdate::succeeded("https://a/x.png"));
        progress.apply(&ServiceProgressUpdate::progress(100));

        assert_eq!(progress.link.as_deref(), Some("https://a/x.png"));
        assert_eq!(progress.status, ServiceStatus::Success);
    }

    #[test]
    fn test_primary_prefers_caller_choice_when_it_succeeded() {
        let results = vec![
            ServiceResult::success(
                ServiceId::new("a"),
                RawUploadResult::with_url("https://a/x.png"),
            ),
            ServiceResult::success(
                ServiceId::new("c"),
                RawUploadResult::with_url("https://c/x.png"),
            ),
        ];
        let primary =
            MultiUploadResult::select_primary(&results, Some(&ServiceId::new("c")));
        assert_eq!(primary, Some(ServiceId::new("c")));
    }

    #[test]
    fn test_primary_falls_back_to_first_success() {
        let results = vec![
            ServiceResult::failure(ServiceId::new("a"), UploadError::network("down")),
            ServiceResult::success(
                ServiceId::new("b"),
                RawUploadResult::with_url("https://b/x.png"),
            ),
        ];
        let primary =
            MultiUploadResult::select_primary(&results, Some(&ServiceId::new("a")));
        assert_eq!(primary, Some(ServiceId::new("b")));
    }

    #[test]
    fn test_no_primary_when_all_failed() {
        let results = vec![ServiceResult::failure(
            ServiceId::new("a"),
            UploadError::network("down"),
        )];
        assert_eq!(MultiUploadResult::select_primary(&results, None), None);
    }
}
