//! Remote synchronization domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named WebDAV sync target. Exactly one profile is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebDavProfile {
    /// Stable profile id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Server base URL (e.g., `https://dav.example.com/remote.php/dav`).
    pub url: String,
    /// Basic-auth username.
    pub username: String,
    /// Basic-auth password or app token.
    pub password: String,
    /// Directory under the server root where backups live.
    pub remote_path: String,
}

/// Which local data set a sync operation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDataKind {
    /// Application settings.
    Config,
    /// Upload history.
    History,
}

impl SyncDataKind {
    /// Remote file name for this data kind.
    #[must_use]
    pub const fn remote_file_name(self) -> &'static str {
        match self {
            Self::Config => "imgfan-config.json",
            Self::History => "imgfan-history.json",
        }
    }
}

/// Outcome of the most recent sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Everything reconciled.
    Success,
    /// Some records reconciled, some failed.
    Partial,
    /// Nothing was applied.
    Failed,
}

/// Per-data-kind record of the last sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// The data kind this status tracks.
    pub kind: SyncDataKind,
    /// When the last attempt finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Result of the last attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SyncOutcome>,
    /// Error text of the last failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStatus {
    /// Status for a kind that has never synced.
    #[must_use]
    pub const fn never(kind: SyncDataKind) -> Self {
        Self {
            kind,
            last_sync: None,
            outcome: None,
            error: None,
        }
    }

    /// Record a finished attempt.
    pub fn record(&mut self, outcome: SyncOutcome, error: Option<String>) {
        self.last_sync = Some(Utc::now());
        self.outcome = Some(outcome);
        self.error = error;
    }
}

/// How local history is pushed to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPolicy {
    /// Bidirectional union by id, newer timestamp wins. The default,
    /// data-preserving choice.
    Merge,
    /// Upload only local records absent remotely; never overwrites remote.
    Incremental,
    /// Replace remote state with local state, discarding remote-only
    /// records. Destructive; requires explicit confirmation upstream.
    Force,
}

/// How remote history is pulled into the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPolicy {
    /// Union by id, newer timestamp wins.
    Merge,
    /// Discard local state and adopt remote verbatim.
    Overwrite,
}

/// Counts of what one reconciliation touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Records pushed to the remote.
    pub uploaded: u32,
    /// Records adopted locally from the remote.
    pub downloaded: u32,
    /// Record count at the remote after the operation.
    pub remote_total: u32,
    /// Record count in the local store after the operation.
    pub local_total: u32,
}
