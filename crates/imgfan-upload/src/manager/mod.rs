//! Fan-out upload engine.
//!
//! Dispatches one local file to every selected destination at once and
//! aggregates the settled outcomes.
//!
//! # Concurrency model
//!
//! - Every adapter attempt runs in its own task; one destination failing
//!   (or panicking) never cancels its siblings.
//! - A single engine-wide `Semaphore` bounds concurrent adapter calls
//!   across all in-flight items.
//! - The queue is the only shared mutable state; attempts patch their own
//!   service entry and never touch siblings.

mod retry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use imgfan_core::domain::{
    HistoryItem, ItemId, MultiUploadResult, QueueItem, ServiceId, ServiceProgressUpdate,
    ServiceResult,
};
use imgfan_core::errors::{AppError, AppResult, UploadError};
use imgfan_core::events::AppEvent;
use imgfan_core::link::{self, LinkConfig};
use imgfan_core::ports::{AppEventEmitter, HistoryRepository, UploadAdapter, UploadRequest};
use imgfan_core::queue::UploadQueue;
use imgfan_core::settings::{JsonSettingsStore, Settings};

use crate::media;
use crate::progress::EmitterProgressSink;

/// Registered hosting backends, keyed by service id.
///
/// Insertion order is preserved; it is the fallback order for primary
/// selection when the preferred service did not succeed.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<IndexMap<ServiceId, Arc<dyn UploadAdapter>>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any previous adapter for the same id.
    pub async fn register(&self, adapter: Arc<dyn UploadAdapter>) {
        let id = adapter.service_id();
        self.adapters.write().await.insert(id, adapter);
    }

    /// Look up one backend.
    pub async fn get(&self, service: &ServiceId) -> Option<Arc<dyn UploadAdapter>> {
        self.adapters.read().await.get(service).cloned()
    }

    /// Ids of every registered backend, in registration order.
    pub async fn ids(&self) -> Vec<ServiceId> {
        self.adapters.read().await.keys().cloned().collect()
    }
}

/// Dependencies for [`UploadManager`].
pub struct UploadManagerDeps {
    pub adapters: Arc<AdapterRegistry>,
    pub queue: Arc<UploadQueue>,
    pub history: Arc<dyn HistoryRepository>,
    pub settings: Arc<JsonSettingsStore>,
    pub emitter: Box<dyn AppEventEmitter>,
}

/// The fan-out upload engine.
pub struct UploadManager {
    adapters: Arc<AdapterRegistry>,
    queue: Arc<UploadQueue>,
    history: Arc<dyn HistoryRepository>,
    settings: Arc<JsonSettingsStore>,
    emitter: Box<dyn AppEventEmitter>,
    semaphore: Arc<Semaphore>,
    // Serializes read-modify-write patches of history rows during retries.
    pub(crate) history_patch: tokio::sync::Mutex<()>,
}

/// Build an upload manager with a global concurrency cap.
#[must_use]
pub fn build_upload_manager(deps: UploadManagerDeps, max_concurrent: usize) -> Arc<UploadManager> {
    Arc::new(UploadManager {
        adapters: deps.adapters,
        queue: deps.queue,
        history: deps.history,
        settings: deps.settings,
        emitter: deps.emitter,
        semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        history_patch: tokio::sync::Mutex::new(()),
    })
}

impl UploadManager {
    /// The queue this engine writes to.
    #[must_use]
    pub fn queue(&self) -> &Arc<UploadQueue> {
        &self.queue
    }

    /// Upload one file to every enabled destination from live settings.
    ///
    /// Adds a queue item, fans out, records a history row when at least one
    /// destination succeeded, and returns the aggregate.
    pub async fn upload_file(&self, path: &Path) -> AppResult<MultiUploadResult> {
        let settings = self.settings.load().await?;
        let services = self.registered_subset(&settings.enabled_services).await;
        if services.is_empty() {
            return Err(AppError::Validation {
                message: "no enabled destination has a registered adapter".to_string(),
            });
        }
        self.upload_to(path, services, &settings).await
    }

    /// Upload one file to an explicit destination list.
    pub async fn upload_to(
        &self,
        path: &Path,
        services: Vec<ServiceId>,
        settings: &Settings,
    ) -> AppResult<MultiUploadResult> {
        let file_name = file_name_of(path)?;
        let id = ItemId::new();
        self.queue
            .add_item(QueueItem::new(
                id,
                file_name.clone(),
                path.to_string_lossy().into_owned(),
                services.clone(),
            ))
            .await;

        info!(item_id = %id, file = %file_name, destinations = services.len(), "upload dispatched");
        let results = self
            .fan_out(id, path.to_path_buf(), file_name.clone(), &services, settings)
            .await;

        let primary_service =
            MultiUploadResult::select_primary(&results, settings.primary_service.as_ref());
        let aggregate = MultiUploadResult {
            item_id: id,
            results,
            primary_service,
        };

        if aggregate.any_success() {
            self.record_history(path, &file_name, &aggregate, &settings.link_config())
                .await?;
        } else {
            warn!(item_id = %id, "every destination failed; no history row recorded");
        }
        Ok(aggregate)
    }

    /// Run one adapter attempt per service and settle them all.
    ///
    /// Results come back in the caller-supplied service order regardless of
    /// completion order.
    async fn fan_out(
        &self,
        id: ItemId,
        path: PathBuf,
        file_name: String,
        services: &[ServiceId],
        settings: &Settings,
    ) -> Vec<ServiceResult> {
        let link_config = settings.link_config();
        let mut handles: Vec<(ServiceId, Option<JoinHandle<ServiceResult>>)> = Vec::new();

        for service in services {
            let Some(adapter) = self.adapters.get(service).await else {
                let error =
                    UploadError::unavailable(service.clone(), "no adapter registered");
                self.queue
                    .update_service(&id, service, ServiceProgressUpdate::failed(error.clone()))
                    .await;
                handles.push((service.clone(), None));
                self.emitter
                    .emit(AppEvent::upload_failed(id, service.clone(), error));
                continue;
            };

            let ctx = AttemptContext {
                adapter,
                queue: Arc::clone(&self.queue),
                emitter: self.emitter.clone_box(),
                semaphore: Arc::clone(&self.semaphore),
                link_config: link_config.clone(),
                request: UploadRequest {
                    item_id: id,
                    file_path: path.clone(),
                    file_name: file_name.clone(),
                    credentials: settings.credentials_for(service),
                },
            };
            handles.push((service.clone(), Some(tokio::spawn(ctx.run()))));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (service, handle) in handles {
            let result = match handle {
                None => ServiceResult::failure(
                    service.clone(),
                    UploadError::unavailable(service.clone(), "no adapter registered"),
                ),
                Some(handle) => match handle.await {
                    Ok(result) => result,
                    // A panicking adapter settles as a typed failure.
                    Err(join_error) => {
                        let error =
                            UploadError::other(format!("adapter crashed: {join_error}"));
                        self.queue
                            .update_service(
                                &id,
                                &service,
                                ServiceProgressUpdate::failed(error.clone()),
                            )
                            .await;
                        self.emitter
                            .emit(AppEvent::upload_failed(id, service.clone(), error.clone()));
                        ServiceResult::failure(service.clone(), error)
                    }
                },
            };
            results.push(result);
        }
        results
    }

    /// Run a single adapter attempt outside the queue-item fan-out path.
    pub(crate) async fn run_single(
        &self,
        id: ItemId,
        path: PathBuf,
        file_name: String,
        service: &ServiceId,
        credentials: Value,
        link_config: &LinkConfig,
    ) -> ServiceResult {
        let Some(adapter) = self.adapters.get(service).await else {
            return ServiceResult::failure(
                service.clone(),
                UploadError::unavailable(service.clone(), "no adapter registered"),
            );
        };
        let ctx = AttemptContext {
            adapter,
            queue: Arc::clone(&self.queue),
            emitter: self.emitter.clone_box(),
            semaphore: Arc::clone(&self.semaphore),
            link_config: link_config.clone(),
            request: UploadRequest {
                item_id: id,
                file_path: path,
                file_name,
                credentials,
            },
        };
        let service = service.clone();
        match tokio::spawn(ctx.run()).await {
            Ok(result) => result,
            Err(join_error) => {
                let error = UploadError::other(format!("adapter crashed: {join_error}"));
                self.queue
                    .update_service(&id, &service, ServiceProgressUpdate::failed(error.clone()))
                    .await;
                self.emitter
                    .emit(AppEvent::upload_failed(id, service.clone(), error.clone()));
                ServiceResult::failure(service, error)
            }
        }
    }

    /// Delete history rows and tell listeners to drop the ids.
    pub async fn delete_history(&self, ids: &[ItemId]) -> AppResult<u32> {
        let deleted = self.history.delete_many(ids).await?;
        if deleted > 0 {
            self.emitter.emit(AppEvent::history_deleted(ids.to_vec()));
        }
        Ok(deleted)
    }

    /// Drop every history row.
    pub async fn clear_history(&self) -> AppResult<()> {
        self.history.clear().await?;
        self.emitter.emit(AppEvent::HistoryCleared);
        Ok(())
    }

    /// Intersect the wanted destinations with the registered adapters,
    /// keeping the caller's order.
    async fn registered_subset(&self, wanted: &[ServiceId]) -> Vec<ServiceId> {
        let mut out = Vec::with_capacity(wanted.len());
        for service in wanted {
            if self.adapters.get(service).await.is_some() {
                out.push(service.clone());
            } else {
                debug!(service = service.as_str(), "enabled destination has no adapter; skipped");
            }
        }
        out
    }

    async fn record_history(
        &self,
        path: &Path,
        file_name: &str,
        aggregate: &MultiUploadResult,
        link_config: &LinkConfig,
    ) -> AppResult<()> {
        // any_success holds here, so a primary exists.
        let primary = aggregate
            .primary_service
            .clone()
            .ok_or_else(|| AppError::Validation {
                message: "aggregate with successes has no primary".to_string(),
            })?;
        let raw_url = aggregate
            .primary_result()
            .map(|r| r.url.clone())
            .unwrap_or_default();
        let generated_link = link::generate(&raw_url, &primary, link_config);

        let mut row = HistoryItem::new(
            aggregate.item_id,
            file_name,
            Some(path.to_string_lossy().into_owned()),
            primary,
            aggregate.results.clone(),
            generated_link,
        );
        // Best-effort dimension sniff; rows without dimensions are patched
        // later by the metadata-fix pass.
        if let Ok(meta) = media::probe_image(path).await {
            row.width = Some(meta.width);
            row.height = Some(meta.height);
        }

        self.history.insert(&row).await?;
        self.emitter.emit(AppEvent::HistoryUpdated);
        Ok(())
    }
}

/// Everything one spawned attempt owns.
struct AttemptContext {
    adapter: Arc<dyn UploadAdapter>,
    queue: Arc<UploadQueue>,
    emitter: Box<dyn AppEventEmitter>,
    semaphore: Arc<Semaphore>,
    link_config: LinkConfig,
    request: UploadRequest,
}

impl AttemptContext {
    async fn run(self) -> ServiceResult {
        let service = self.adapter.service_id();
        let id = self.request.item_id;

        let _permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let error = UploadError::other("upload engine is shutting down");
                self.queue
                    .update_service(&id, &service, ServiceProgressUpdate::failed(error.clone()))
                    .await;
                return ServiceResult::failure(service, error);
            }
        };

        self.queue
            .update_service(&id, &service, ServiceProgressUpdate::uploading())
            .await;

        let sink = Arc::new(EmitterProgressSink::new(
            self.emitter.clone_box(),
            id,
            service.clone(),
        ));

        match self.adapter.upload(&self.request, sink).await {
            Ok(raw) => {
                let link = link::generate(&raw.url, &service, &self.link_config);
                self.queue
                    .update_service(&id, &service, ServiceProgressUpdate::succeeded(link.clone()))
                    .await;
                self.emitter
                    .emit(AppEvent::upload_succeeded(id, service.clone(), link));
                ServiceResult::success(service, raw)
            }
            Err(error) => {
                debug!(item_id = %id, service = service.as_str(), %error, "destination failed");
                self.queue
                    .update_service(&id, &service, ServiceProgressUpdate::failed(error.clone()))
                    .await;
                self.emitter
                    .emit(AppEvent::upload_failed(id, service.clone(), error.clone()));
                ServiceResult::failure(service, error)
            }
        }
    }
}

fn file_name_of(path: &Path) -> AppResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::Validation {
            message: format!("'{}' has no file name", path.display()),
        })
}

pub use retry::RetryReport;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AdapterScript, ScriptedAdapter};
    use imgfan_core::domain::ItemStatus;
    use imgfan_core::ports::BroadcastEmitter;
    use imgfan_db::setup_test_database;
    use std::io::Write;

    pub(crate) struct Harness {
        pub manager: Arc<UploadManager>,
        pub registry: Arc<AdapterRegistry>,
        pub queue: Arc<UploadQueue>,
        pub history: Arc<dyn HistoryRepository>,
        pub settings: Arc<JsonSettingsStore>,
        pub events: tokio::sync::broadcast::Receiver<AppEvent>,
        pub _dir: tempfile::TempDir,
    }

    pub(crate) async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let emitter = BroadcastEmitter::new(256);
        let events = emitter.subscribe();
        let registry = Arc::new(AdapterRegistry::new());
        let queue = Arc::new(UploadQueue::new(Arc::new(emitter.clone())));
        let history: Arc<dyn HistoryRepository> = Arc::new(
            imgfan_db::SqliteHistoryRepository::new(setup_test_database().await.unwrap()),
        );
        let settings = Arc::new(JsonSettingsStore::new(
            dir.path().join("settings.json"),
            Arc::new(imgfan_core::ports::NoopEmitter::new()),
        ));
        let manager = build_upload_manager(
            UploadManagerDeps {
                adapters: Arc::clone(&registry),
                queue: Arc::clone(&queue),
                history: Arc::clone(&history),
                settings: Arc::clone(&settings),
                emitter: Box::new(emitter),
            },
            8,
        );
        Harness {
            manager,
            registry,
            queue,
            history,
            settings,
            events,
            _dir: dir,
        }
    }

    pub(crate) fn write_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"not really an image").unwrap();
        path
    }

    fn settings_for(services: &[&str], preferred: Option<&str>) -> Settings {
        let mut settings = Settings::with_defaults();
        settings.enabled_services = services.iter().map(|s| ServiceId::new(*s)).collect();
        settings.primary_service = preferred.map(ServiceId::new);
        settings
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_siblings_and_prefers_later_primary() {
        let h = harness().await;
        h.registry
            .register(Arc::new(ScriptedAdapter::new("a", AdapterScript::succeed("https://a/x.png"))))
            .await;
        h.registry
            .register(Arc::new(ScriptedAdapter::new(
                "b",
                AdapterScript::fail(UploadError::network("connection reset")),
            )))
            .await;
        h.registry
            .register(Arc::new(ScriptedAdapter::new("c", AdapterScript::succeed("https://c/x.png"))))
            .await;

        let path = write_file(&h._dir, "x.png");
        let settings = settings_for(&["a", "b", "c"], Some("c"));
        let aggregate = h.manager.upload_to(&path, settings.enabled_services.clone(), &settings).await.unwrap();

        assert_eq!(aggregate.results.len(), 3);
        assert!(aggregate.results[0].is_success());
        assert!(!aggregate.results[1].is_success());
        assert!(aggregate.results[2].is_success());
        assert_eq!(aggregate.primary_service, Some(ServiceId::new("c")));

        let item = h.queue.get_item(&aggregate.item_id).await.unwrap();
        assert_eq!(item.status, ItemStatus::Success);
        assert_eq!(item.failed_services(), vec![ServiceId::new("b")]);

        let row = h.history.get_by_id(&aggregate.item_id).await.unwrap().unwrap();
        assert_eq!(row.primary_service, ServiceId::new("c"));
        assert_eq!(row.results.len(), 3);
        assert_eq!(row.generated_link, "https://c/x.png");
    }

    #[tokio::test]
    async fn test_panicking_adapter_settles_as_failure() {
        let h = harness().await;
        h.registry
            .register(Arc::new(ScriptedAdapter::new("a", AdapterScript::panic())))
            .await;
        h.registry
            .register(Arc::new(ScriptedAdapter::new("b", AdapterScript::succeed("https://b/x.png"))))
            .await;

        let path = write_file(&h._dir, "x.png");
        let settings = settings_for(&["a", "b"], None);
        let aggregate = h.manager.upload_to(&path, settings.enabled_services.clone(), &settings).await.unwrap();

        assert!(!aggregate.results[0].is_success());
        assert!(aggregate.results[1].is_success());
        assert_eq!(aggregate.primary_service, Some(ServiceId::new("b")));
    }

    #[tokio::test]
    async fn test_all_failures_record_no_history_row() {
        let h = harness().await;
        h.registry
            .register(Arc::new(ScriptedAdapter::new(
                "a",
                AdapterScript::fail(UploadError::unavailable(ServiceId::new("a"), "down")),
            )))
            .await;

        let path = write_file(&h._dir, "x.png");
        let settings = settings_for(&["a"], None);
        let aggregate = h.manager.upload_to(&path, settings.enabled_services.clone(), &settings).await.unwrap();

        assert!(!aggregate.any_success());
        assert!(aggregate.primary_service.is_none());
        assert_eq!(h.history.count().await.unwrap(), 0);

        let item = h.queue.get_item(&aggregate.item_id).await.unwrap();
        assert_eq!(item.status, ItemStatus::Error);
    }

    #[tokio::test]
    async fn test_upload_file_rejects_when_nothing_registered() {
        let h = harness().await;
        let path = write_file(&h._dir, "x.png");
        assert!(h.manager.upload_file(&path).await.is_err());
    }

    mockall::mock! {
        Adapter {}

        #[async_trait::async_trait]
        impl UploadAdapter for Adapter {
            fn service_id(&self) -> ServiceId;
            async fn upload(
                &self,
                request: &UploadRequest,
                progress: Arc<dyn imgfan_core::ports::ProgressSink>,
            ) -> Result<imgfan_core::domain::RawUploadResult, UploadError>;
            async fn test_connection(
                &self,
                credentials: &Value,
            ) -> Result<Option<String>, UploadError>;
        }
    }

    #[tokio::test]
    async fn test_stored_credentials_reach_the_adapter() {
        let h = harness().await;
        let mut adapter = MockAdapter::new();
        adapter
            .expect_service_id()
            .return_const(ServiceId::new("a"));
        adapter
            .expect_upload()
            .withf(|request, _| request.credentials["token"] == "secret")
            .returning(|_, _| {
                Ok(imgfan_core::domain::RawUploadResult::with_url(
                    "https://a/x.png",
                ))
            });
        h.registry.register(Arc::new(adapter)).await;

        let mut settings = settings_for(&["a"], None);
        settings.service_credentials.insert(
            ServiceId::new("a"),
            serde_json::json!({ "token": "secret" }),
        );

        let path = write_file(&h._dir, "x.png");
        let aggregate = h
            .manager
            .upload_to(&path, settings.enabled_services.clone(), &settings)
            .await
            .unwrap();
        assert!(aggregate.any_success());
    }

    #[tokio::test]
    async fn test_history_deletion_emits_dropped_ids() {
        let mut h = harness().await;
        h.registry
            .register(Arc::new(ScriptedAdapter::new("a", AdapterScript::succeed("https://a/x.png"))))
            .await;

        let path = write_file(&h._dir, "x.png");
        let settings = settings_for(&["a"], None);
        let aggregate = h
            .manager
            .upload_to(&path, settings.enabled_services.clone(), &settings)
            .await
            .unwrap();

        let deleted = h.manager.delete_history(&[aggregate.item_id]).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(h.history.get_by_id(&aggregate.item_id).await.unwrap().is_none());

        let mut saw_deleted = false;
        while let Ok(event) = h.events.try_recv() {
            if let AppEvent::HistoryDeleted { ids } = event {
                assert_eq!(ids, vec![aggregate.item_id]);
                saw_deleted = true;
            }
        }
        assert!(saw_deleted);

        // Deleting ids that are already gone is a quiet no-op.
        let deleted = h.manager.delete_history(&[aggregate.item_id]).await.unwrap();
        assert_eq!(deleted, 0);

        h.manager.clear_history().await.unwrap();
        assert_eq!(h.history.count().await.unwrap(), 0);
        let mut saw_cleared = false;
        while let Ok(event) = h.events.try_recv() {
            if event == AppEvent::HistoryCleared {
                saw_cleared = true;
            }
        }
        assert!(saw_cleared);
    }
}
