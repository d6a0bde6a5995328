//! Retry engine.
//!
//! Re-runs failed destinations with configuration read live at retry time.
//! Single-service retries patch exactly one queue progress entry and exactly
//! one entry of the history row's `results` array; sibling entries are never
//! rewritten.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use imgfan_core::domain::{HistoryItem, ItemId, ServiceId, ServiceResult};
use imgfan_core::errors::{AppError, AppResult};
use imgfan_core::events::AppEvent;
use imgfan_core::link;
use imgfan_core::settings::Settings;

use super::UploadManager;

/// Outcome of a batch retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Attempts dispatched.
    pub attempted: u32,
    /// Attempts that settled successfully.
    pub recovered: u32,
    /// Whether the batch stopped early on cancellation.
    pub cancelled: bool,
}

impl UploadManager {
    /// Retry one destination of one item.
    ///
    /// Settings are re-read so credential or link-mode changes made since
    /// the original attempt take effect.
    pub async fn retry_service(
        &self,
        item_id: ItemId,
        service: &ServiceId,
    ) -> AppResult<ServiceResult> {
        let settings = self.settings.load().await?;
        self.retry_service_with(item_id, service, &settings).await
    }

    /// Retry every failed destination of one item, sequentially.
    ///
    /// Stops between attempts when `cancel` fires; already-settled retries
    /// keep their outcome.
    pub async fn retry_item(
        &self,
        item_id: ItemId,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<ServiceResult>> {
        let settings = self.settings.load().await?;
        let failed = self.failed_services_of(item_id).await?;

        let mut settled = Vec::with_capacity(failed.len());
        for service in failed {
            if cancel.is_cancelled() {
                break;
            }
            settled.push(self.retry_service_with(item_id, &service, &settings).await?);
        }
        Ok(settled)
    }

    /// Retry every failed destination of many items, sequentially across
    /// items. One item failing never aborts the rest of the batch.
    pub async fn retry_all_failed(
        &self,
        item_ids: &[ItemId],
        cancel: &CancellationToken,
    ) -> AppResult<RetryReport> {
        let mut report = RetryReport::default();
        for id in item_ids {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.retry_item(*id, cancel).await {
                Ok(settled) => {
                    report.attempted += settled.len() as u32;
                    report.recovered +=
                        settled.iter().filter(|r| r.is_success()).count() as u32;
                }
                Err(error) => {
                    warn!(item_id = %id, %error, "retry skipped item");
                }
            }
        }
        info!(
            attempted = report.attempted,
            recovered = report.recovered,
            "batch retry finished"
        );
        Ok(report)
    }

    async fn retry_service_with(
        &self,
        item_id: ItemId,
        service: &ServiceId,
        settings: &Settings,
    ) -> AppResult<ServiceResult> {
        let (path, file_name) = self.locate_item(item_id).await?;
        let link_config = settings.link_config();

        let result = self
            .run_single(
                item_id,
                path.clone(),
                file_name.clone(),
                service,
                settings.credentials_for(service),
                &link_config,
            )
            .await;

        // Read-modify-write of the history row, serialized so two retries of
        // the same item cannot interleave their patches.
        let _guard = self.history_patch.lock().await;
        match self.history.get_by_id(&item_id).await? {
            Some(mut row) => {
                row.upsert_result(result.clone());
                // A recovered primary gets its canonical link refreshed; the
                // primary choice itself is not revisited on retry.
                if result.is_success() && row.primary_service == *service {
                    if let Some(raw) = result.result.as_ref() {
                        row.generated_link = link::generate(&raw.url, service, &link_config);
                    }
                }
                self.history.upsert(&row).await?;
            }
            None if result.is_success() => {
                // The original fan-out failed everywhere, so no row exists
                // yet; this retry success creates it.
                let raw_url = result
                    .result
                    .as_ref()
                    .map(|r| r.url.clone())
                    .unwrap_or_default();
                let row = HistoryItem::new(
                    item_id,
                    file_name,
                    Some(path.to_string_lossy().into_owned()),
                    service.clone(),
                    vec![result.clone()],
                    link::generate(&raw_url, service, &link_config),
                );
                self.history.insert(&row).await?;
            }
            None => {}
        }
        drop(_guard);

        self.emitter.emit(AppEvent::HistoryUpdated);
        Ok(result)
    }

    /// Resolve the local file behind an item, preferring the live queue
    /// entry and falling back to the history row.
    async fn locate_item(&self, item_id: ItemId) -> AppResult<(PathBuf, String)> {
        if let Some(item) = self.queue.get_item(&item_id).await {
            return Ok((PathBuf::from(item.file_path), item.file_name));
        }
        if let Some(row) = self.history.get_by_id(&item_id).await? {
            if let Some(path) = row.file_path {
                return Ok((PathBuf::from(path), row.local_file_name));
            }
            return Err(AppError::Validation {
                message: format!("item '{item_id}' has no local file to retry from"),
            });
        }
        Err(AppError::Validation {
            message: format!("unknown item '{item_id}'"),
        })
    }

    async fn failed_services_of(&self, item_id: ItemId) -> AppResult<Vec<ServiceId>> {
        if let Some(item) = self.queue.get_item(&item_id).await {
            return Ok(item.failed_services());
        }
        if let Some(row) = self.history.get_by_id(&item_id).await? {
            return Ok(row
                .results
                .iter()
                .filter(|r| !r.is_success())
                .map(|r| r.service.clone())
                .collect());
        }
        Err(AppError::Validation {
            message: format!("unknown item '{item_id}'"),
        })
    }
}
