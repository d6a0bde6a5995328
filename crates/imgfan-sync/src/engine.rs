//! Backup reconciliation engine.
//!
//! Moves two data kinds (settings, history) between the local stores and
//! one remote backup directory. Every policy parses and reconciles fully
//! in memory before the first write, so a failure surfaces before local or
//! remote state changes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use imgfan_core::domain::{
    DownloadPolicy, HistoryItem, SyncDataKind, SyncOutcome, SyncReport, SyncStatus, UploadPolicy,
};
use imgfan_core::errors::StorageError;
use imgfan_core::events::AppEvent;
use imgfan_core::ports::{
    AppEventEmitter, HistoryRepository, ImportStrategy, RemoteStore, RemoteStoreError,
};
use imgfan_core::settings::{JsonSettingsStore, Settings, validate_settings};

/// Errors of one sync operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote store failed.
    #[error(transparent)]
    Remote(#[from] RemoteStoreError),

    /// The local store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A payload on either side could not be parsed.
    #[error("Sync payload invalid: {message}")]
    Payload {
        /// Detailed error message.
        message: String,
    },
}

impl SyncError {
    fn payload(message: impl Into<String>) -> Self {
        Self::Payload {
            message: message.into(),
        }
    }
}

/// Dependencies for [`SyncEngine`].
pub struct SyncEngineDeps {
    pub remote: Arc<dyn RemoteStore>,
    pub history: Arc<dyn HistoryRepository>,
    pub settings: Arc<JsonSettingsStore>,
    pub emitter: Box<dyn AppEventEmitter>,
}

/// The reconciliation engine. One instance per active profile.
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    history: Arc<dyn HistoryRepository>,
    settings: Arc<JsonSettingsStore>,
    emitter: Box<dyn AppEventEmitter>,
    status: Mutex<HashMap<SyncDataKind, SyncStatus>>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(deps: SyncEngineDeps) -> Self {
        Self {
            remote: deps.remote,
            history: deps.history,
            settings: deps.settings,
            emitter: deps.emitter,
            status: Mutex::new(HashMap::new()),
        }
    }

    /// Last attempt record for one data kind.
    pub async fn status(&self, kind: SyncDataKind) -> SyncStatus {
        self.status
            .lock()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| SyncStatus::never(kind))
    }

    /// Push local history to the remote under the given policy.
    pub async fn upload_history(&self, policy: UploadPolicy) -> Result<SyncReport, SyncError> {
        self.run(SyncDataKind::History, self.upload_history_inner(policy))
            .await
    }

    /// Pull remote history into the local store under the given policy.
    pub async fn download_history(&self, policy: DownloadPolicy) -> Result<SyncReport, SyncError> {
        self.run(SyncDataKind::History, self.download_history_inner(policy))
            .await
    }

    /// Push local settings to the remote, replacing the remote copy.
    pub async fn upload_config(&self) -> Result<SyncReport, SyncError> {
        self.run(SyncDataKind::Config, self.upload_config_inner())
            .await
    }

    /// Adopt remote settings verbatim.
    pub async fn download_config(&self) -> Result<SyncReport, SyncError> {
        self.run(SyncDataKind::Config, self.download_config_inner())
            .await
    }

    /// Push both data kinds in one run.
    ///
    /// A failing kind does not abort the other; the combined outcome is
    /// [`SyncOutcome::Partial`] when exactly one kind reconciled.
    pub async fn backup_all(&self, policy: UploadPolicy) -> SyncOutcome {
        let config = self.upload_config().await.is_ok();
        let history = self.upload_history(policy).await.is_ok();
        match (config, history) {
            (true, true) => SyncOutcome::Success,
            (false, false) => SyncOutcome::Failed,
            _ => SyncOutcome::Partial,
        }
    }

    /// Wrap one operation with events and status bookkeeping.
    async fn run<F>(&self, kind: SyncDataKind, op: F) -> Result<SyncReport, SyncError>
    where
        F: Future<Output = Result<SyncReport, SyncError>>,
    {
        self.emitter.emit(AppEvent::SyncStarted { kind });
        let result = op.await;

        let (outcome, error) = match &result {
            Ok(_) => (SyncOutcome::Success, None),
            Err(e) => (SyncOutcome::Failed, Some(e.to_string())),
        };
        if let Some(error) = &error {
            warn!(?kind, error, "sync attempt failed");
        }

        let mut status = self.status.lock().await;
        status
            .entry(kind)
            .or_insert_with(|| SyncStatus::never(kind))
            .record(outcome, error);
        drop(status);

        self.emitter.emit(AppEvent::SyncFinished { kind, outcome });
        result
    }

    async fn upload_history_inner(&self, policy: UploadPolicy) -> Result<SyncReport, SyncError> {
        self.remote.ensure_root().await?;
        let local = self.local_history().await?;
        let file = SyncDataKind::History.remote_file_name();

        let report = match policy {
            UploadPolicy::Force => {
                // Remote adopts local verbatim; remote-only records are gone.
                let total = local.len() as u32;
                self.put_history(file, &local).await?;
                SyncReport {
                    uploaded: total,
                    downloaded: 0,
                    remote_total: total,
                    local_total: total,
                }
            }
            UploadPolicy::Incremental => {
                let remote = self.remote_history(file).await?.unwrap_or_default();
                let mut merged = remote.clone();
                let mut uploaded = 0u32;
                for record in &local {
                    if !remote.iter().any(|r| r.id == record.id) {
                        merged.push(record.clone());
                        uploaded += 1;
                    }
                }
                sort_newest_first(&mut merged);
                self.put_history(file, &merged).await?;
                SyncReport {
                    uploaded,
                    downloaded: 0,
                    remote_total: merged.len() as u32,
                    local_total: local.len() as u32,
                }
            }
            UploadPolicy::Merge => {
                let remote = self.remote_history(file).await?.unwrap_or_default();
                let (merged, uploaded) = merge_by_id(&local, &remote);

                // Remote commit first: a failed PUT must leave the local
                // store as it was. The local import is transactional on
                // its own.
                self.put_history(file, &merged).await?;
                let downloaded = self.import_merge(&merged).await?;
                SyncReport {
                    uploaded,
                    downloaded,
                    remote_total: merged.len() as u32,
                    local_total: self.history.count().await? as u32,
                }
            }
        };

        info!(
            uploaded = report.uploaded,
            remote_total = report.remote_total,
            ?policy,
            "history upload finished"
        );
        if report.downloaded > 0 {
            self.emitter.emit(AppEvent::HistoryUpdated);
        }
        Ok(report)
    }

    async fn download_history_inner(
        &self,
        policy: DownloadPolicy,
    ) -> Result<SyncReport, SyncError> {
        let file = SyncDataKind::History.remote_file_name();
        let Some(remote) = self.remote_history(file).await? else {
            // Nothing remote; an empty pull is a no-op, not an error.
            return Ok(SyncReport {
                uploaded: 0,
                downloaded: 0,
                remote_total: 0,
                local_total: self.history.count().await? as u32,
            });
        };

        let downloaded = match policy {
            DownloadPolicy::Merge => self.import_merge(&remote).await?,
            DownloadPolicy::Overwrite => {
                let payload = serde_json::to_string_pretty(&remote)
                    .map_err(|e| SyncError::payload(e.to_string()))?;
                self.history
                    .import_json(&payload, ImportStrategy::Replace)
                    .await?
            }
        };

        if downloaded > 0 {
            self.emitter.emit(AppEvent::HistoryUpdated);
        }
        info!(downloaded, ?policy, "history download finished");
        Ok(SyncReport {
            uploaded: 0,
            downloaded,
            remote_total: remote.len() as u32,
            local_total: self.history.count().await? as u32,
        })
    }

    async fn upload_config_inner(&self) -> Result<SyncReport, SyncError> {
        self.remote.ensure_root().await?;
        let settings = self.settings.load().await?;
        let payload = serde_json::to_vec_pretty(&json!({
            "exportedAt": Utc::now().timestamp_millis(),
            "settings": settings,
        }))
        .map_err(|e| SyncError::payload(e.to_string()))?;

        self.remote
            .put(SyncDataKind::Config.remote_file_name(), payload)
            .await?;
        Ok(SyncReport {
            uploaded: 1,
            downloaded: 0,
            remote_total: 1,
            local_total: 1,
        })
    }

    async fn download_config_inner(&self) -> Result<SyncReport, SyncError> {
        let file = SyncDataKind::Config.remote_file_name();
        let Some(bytes) = self.remote.get(file).await? else {
            return Ok(SyncReport::default());
        };

        let envelope: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::payload(format!("remote config unparsable: {e}")))?;
        let settings: Settings = serde_json::from_value(
            envelope
                .get("settings")
                .cloned()
                .ok_or_else(|| SyncError::payload("remote config has no settings object"))?,
        )
        .map_err(|e| SyncError::payload(format!("remote settings invalid: {e}")))?;
        validate_settings(&settings)
            .map_err(|e| SyncError::payload(format!("remote settings rejected: {e}")))?;

        self.settings
            .replace(&settings)
            .await
            .map_err(|e| SyncError::payload(format!("cannot adopt remote settings: {e}")))?;
        Ok(SyncReport {
            uploaded: 0,
            downloaded: 1,
            remote_total: 1,
            local_total: 1,
        })
    }

    async fn local_history(&self) -> Result<Vec<HistoryItem>, SyncError> {
        let json = self.history.export_json().await?;
        serde_json::from_str(&json).map_err(|e| SyncError::payload(e.to_string()))
    }

    async fn remote_history(&self, file: &str) -> Result<Option<Vec<HistoryItem>>, SyncError> {
        let Some(bytes) = self.remote.get(file).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SyncError::payload(format!("remote history unparsable: {e}")))
    }

    async fn put_history(&self, file: &str, records: &[HistoryItem]) -> Result<(), SyncError> {
        let payload = serde_json::to_vec_pretty(records)
            .map_err(|e| SyncError::payload(e.to_string()))?;
        self.remote.put(file, payload).await?;
        Ok(())
    }

    async fn import_merge(&self, records: &[HistoryItem]) -> Result<u32, SyncError> {
        let payload =
            serde_json::to_string_pretty(records).map_err(|e| SyncError::payload(e.to_string()))?;
        Ok(self
            .history
            .import_json(&payload, ImportStrategy::Merge)
            .await?)
    }
}

/// Union of both sides by id; on a shared id the strictly newer timestamp
/// wins. Returns the union plus how many records differ from the remote
/// side (i.e., would be pushed).
fn merge_by_id(local: &[HistoryItem], remote: &[HistoryItem]) -> (Vec<HistoryItem>, u32) {
    let mut merged: Vec<HistoryItem> = remote.to_vec();
    let mut uploaded = 0u32;

    for record in local {
        match merged.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                if record.timestamp > existing.timestamp {
                    *existing = record.clone();
                    uploaded += 1;
                }
            }
            None => {
                merged.push(record.clone());
                uploaded += 1;
            }
        }
    }

    sort_newest_first(&mut merged);
    (merged, uploaded)
}

fn sort_newest_first(records: &mut [HistoryItem]) {
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgfan_core::domain::{ItemId, RawUploadResult, ServiceId, ServiceResult};
    use imgfan_core::ports::NoopEmitter;
    use imgfan_db::{SqliteHistoryRepository, setup_test_database};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    /// In-memory remote directory.
    #[derive(Default)]
    struct FakeRemote {
        files: StdMutex<StdHashMap<String, Vec<u8>>>,
        fail_puts: bool,
        fail_put_of: Option<String>,
    }

    #[async_trait::async_trait]
    impl RemoteStore for FakeRemote {
        async fn get(&self, file_name: &str) -> Result<Option<Vec<u8>>, RemoteStoreError> {
            Ok(self.files.lock().unwrap().get(file_name).cloned())
        }

        async fn put(&self, file_name: &str, body: Vec<u8>) -> Result<(), RemoteStoreError> {
            if self.fail_puts || self.fail_put_of.as_deref() == Some(file_name) {
                return Err(RemoteStoreError::unreachable("scripted failure"));
            }
            self.files
                .lock()
                .unwrap()
                .insert(file_name.to_string(), body);
            Ok(())
        }

        async fn ensure_root(&self) -> Result<(), RemoteStoreError> {
            Ok(())
        }
    }

    struct Harness {
        engine: SyncEngine,
        remote: Arc<FakeRemote>,
        history: Arc<dyn HistoryRepository>,
        _dir: tempfile::TempDir,
    }

    async fn harness(fail_puts: bool) -> Harness {
        harness_with(FakeRemote {
            fail_puts,
            ..FakeRemote::default()
        })
        .await
    }

    async fn harness_with(remote: FakeRemote) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(remote);
        let history: Arc<dyn HistoryRepository> = Arc::new(SqliteHistoryRepository::new(
            setup_test_database().await.unwrap(),
        ));
        let settings = Arc::new(JsonSettingsStore::new(
            dir.path().join("settings.json"),
            Arc::new(NoopEmitter::new()),
        ));
        let engine = SyncEngine::new(SyncEngineDeps {
            remote: Arc::clone(&remote) as Arc<dyn RemoteStore>,
            history: Arc::clone(&history),
            settings,
            emitter: Box::new(NoopEmitter::new()),
        });
        Harness {
            engine,
            remote,
            history,
            _dir: dir,
        }
    }

    fn record(name: &str, timestamp: i64) -> HistoryItem {
        let mut item = HistoryItem::new(
            ItemId::new(),
            name,
            None,
            ServiceId::new("a"),
            vec![ServiceResult::success(
                ServiceId::new("a"),
                RawUploadResult::with_url(format!("https://a/{name}")),
            )],
            format!("https://a/{name}"),
        );
        item.timestamp = timestamp;
        item
    }

    fn remote_records(h: &Harness) -> Vec<HistoryItem> {
        let files = h.remote.files.lock().unwrap();
        let bytes = files
            .get(SyncDataKind::History.remote_file_name())
            .expect("remote history file");
        serde_json::from_slice(bytes).unwrap()
    }

    fn seed_remote(h: &Harness, records: &[HistoryItem]) {
        h.remote.files.lock().unwrap().insert(
            SyncDataKind::History.remote_file_name().to_string(),
            serde_json::to_vec_pretty(records).unwrap(),
        );
    }

    #[tokio::test]
    async fn test_merge_upload_unions_and_newer_wins() {
        let h = harness(false).await;
        let shared_old = record("shared.png", 100);
        let mut shared_new = shared_old.clone();
        shared_new.timestamp = 200;
        shared_new.generated_link = "https://a/shared-v2.png".to_string();

        h.history.insert(&shared_new).await.unwrap();
        h.history.insert(&record("local-only.png", 50)).await.unwrap();
        seed_remote(&h, &[shared_old, record("remote-only.png", 70)]);

        let report = h.engine.upload_history(UploadPolicy::Merge).await.unwrap();

        let remote = remote_records(&h);
        assert_eq!(remote.len(), 3);
        assert_eq!(report.remote_total, 3);
        assert_eq!(report.local_total, 3); // remote-only record adopted locally
        let shared = remote
            .iter()
            .find(|r| r.local_file_name == "shared.png")
            .unwrap();
        assert_eq!(shared.generated_link, "https://a/shared-v2.png");
    }

    #[tokio::test]
    async fn test_incremental_upload_never_overwrites_remote_records() {
        let h = harness(false).await;
        let shared_remote = record("shared.png", 300);
        let mut shared_local = shared_remote.clone();
        shared_local.timestamp = 999;
        shared_local.generated_link = "https://a/should-not-win.png".to_string();

        h.history.insert(&shared_local).await.unwrap();
        h.history.insert(&record("new.png", 10)).await.unwrap();
        seed_remote(&h, &[shared_remote.clone()]);

        let report = h
            .engine
            .upload_history(UploadPolicy::Incremental)
            .await
            .unwrap();

        assert_eq!(report.uploaded, 1); // only the absent record
        let remote = remote_records(&h);
        let shared = remote.iter().find(|r| r.id == shared_remote.id).unwrap();
        assert_eq!(shared.generated_link, shared_remote.generated_link);
        // Local store untouched by an upload-only policy.
        assert_eq!(h.history.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_force_upload_discards_remote_only_records() {
        let h = harness(false).await;
        h.history.insert(&record("local.png", 1)).await.unwrap();
        seed_remote(&h, &[record("remote-only.png", 2)]);

        let report = h.engine.upload_history(UploadPolicy::Force).await.unwrap();

        assert_eq!(report.remote_total, 1);
        let remote = remote_records(&h);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].local_file_name, "local.png");
    }

    #[tokio::test]
    async fn test_download_overwrite_adopts_remote_verbatim() {
        let h = harness(false).await;
        h.history.insert(&record("local.png", 1)).await.unwrap();
        let remote_record = record("remote.png", 2);
        seed_remote(&h, &[remote_record.clone()]);

        let report = h
            .engine
            .download_history(DownloadPolicy::Overwrite)
            .await
            .unwrap();

        assert_eq!(report.downloaded, 1);
        assert_eq!(h.history.count().await.unwrap(), 1);
        let kept = h.history.get_by_id(&remote_record.id).await.unwrap();
        assert!(kept.is_some());
    }

    #[tokio::test]
    async fn test_unparsable_remote_leaves_both_sides_untouched() {
        let h = harness(false).await;
        h.history.insert(&record("local.png", 1)).await.unwrap();
        h.remote.files.lock().unwrap().insert(
            SyncDataKind::History.remote_file_name().to_string(),
            b"not json at all".to_vec(),
        );

        let result = h.engine.upload_history(UploadPolicy::Merge).await;
        assert!(matches!(result, Err(SyncError::Payload { .. })));
        assert_eq!(h.history.count().await.unwrap(), 1);
        assert_eq!(
            h.remote
                .files
                .lock()
                .unwrap()
                .get(SyncDataKind::History.remote_file_name())
                .unwrap(),
            b"not json at all"
        );
    }

    #[tokio::test]
    async fn test_merge_upload_put_failure_leaves_local_untouched() {
        let h = harness(true).await;
        h.history.insert(&record("local.png", 1)).await.unwrap();
        seed_remote(&h, &[record("remote-only.png", 2)]);

        let result = h.engine.upload_history(UploadPolicy::Merge).await;
        assert!(matches!(result, Err(SyncError::Remote(_))));

        // The remote-only record is never adopted when the push fails.
        assert_eq!(h.history.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_status_records_failed_attempts() {
        let h = harness(true).await;
        h.history.insert(&record("local.png", 1)).await.unwrap();

        assert!(h.engine.upload_history(UploadPolicy::Force).await.is_err());
        let status = h.engine.status(SyncDataKind::History).await;
        assert_eq!(status.outcome, Some(SyncOutcome::Failed));
        assert!(status.error.is_some());
        assert!(status.last_sync.is_some());

        // Config status is tracked independently.
        let config = h.engine.status(SyncDataKind::Config).await;
        assert!(config.outcome.is_none());
    }

    #[tokio::test]
    async fn test_backup_all_reports_partial_when_one_kind_fails() {
        let h = harness_with(FakeRemote {
            fail_put_of: Some(SyncDataKind::History.remote_file_name().to_string()),
            ..FakeRemote::default()
        })
        .await;
        h.history.insert(&record("local.png", 1)).await.unwrap();

        let outcome = h.engine.backup_all(UploadPolicy::Force).await;
        assert_eq!(outcome, SyncOutcome::Partial);

        // The config push went through; the history push is the failure.
        assert!(
            h.remote
                .files
                .lock()
                .unwrap()
                .contains_key(SyncDataKind::Config.remote_file_name())
        );
        assert_eq!(
            h.engine.status(SyncDataKind::History).await.outcome,
            Some(SyncOutcome::Failed)
        );
    }

    #[tokio::test]
    async fn test_backup_all_reports_failed_when_nothing_reconciles() {
        let h = harness(true).await;
        let outcome = h.engine.backup_all(UploadPolicy::Merge).await;
        assert_eq!(outcome, SyncOutcome::Failed);
    }

    #[tokio::test]
    async fn test_missing_remote_download_is_a_noop() {
        let h = harness(false).await;
        h.history.insert(&record("local.png", 1)).await.unwrap();

        let report = h
            .engine
            .download_history(DownloadPolicy::Merge)
            .await
            .unwrap();
        assert_eq!(report.downloaded, 0);
        assert_eq!(h.history.count().await.unwrap(), 1);
    }
}
