//! Bulk link validity checking.
//!
//! Walks the whole history in batches and probes every stored link.
//! Ordinary links answer a HEAD; links behind the proxy prefix reject HEAD,
//! so those get a GET with `Range: bytes=0-0` instead.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::RANGE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use imgfan_core::domain::{LinkCheckErrorType, LinkCheckStatus, LinkCheckSummary};
use imgfan_core::errors::{AppError, AppResult};
use imgfan_core::link::LinkConfig;
use imgfan_core::ports::{HistoryRepository, HistoryScan};

/// Per-probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix carried by every temp file this crate writes.
pub const TEMP_PREFIX: &str = "imgfan-tmp-";

/// Temp files older than this are swept.
const TEMP_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Bulk link prober.
pub struct LinkChecker {
    history: Arc<dyn HistoryRepository>,
    client: reqwest::Client,
}

impl LinkChecker {
    /// Create a checker with its own HTTP client.
    pub fn new(history: Arc<dyn HistoryRepository>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| AppError::Network {
                message: format!("cannot build probe client: {e}"),
            })?;
        Ok(Self { history, client })
    }

    /// Probe every history row's links and fold the outcome back into the
    /// rows. Returns the run-level aggregate over rows.
    ///
    /// Cancellation is checked between rows; rows already patched keep
    /// their fresh status.
    pub async fn check_all(
        &self,
        config: &LinkConfig,
        batch_size: u32,
        cancel: &CancellationToken,
    ) -> AppResult<LinkCheckSummary> {
        let mut scan = HistoryScan::new(Arc::clone(&self.history), batch_size);
        let mut total = 0u32;
        let mut valid = 0u32;

        'rows: while let Some(batch) = scan.next_batch().await? {
            for mut row in batch {
                if cancel.is_cancelled() {
                    info!(total, valid, "link check cancelled");
                    break 'rows;
                }

                let status = self.probe(&row.generated_link, config).await;
                let mut row_valid = 0u32;
                let mut row_total = 0u32;
                for result in &row.results {
                    let Some(url) = result.result.as_ref().map(|r| r.url.as_str()) else {
                        continue;
                    };
                    row_total += 1;
                    if self.probe(url, config).await.valid {
                        row_valid += 1;
                    }
                }

                total += 1;
                if status.valid {
                    valid += 1;
                }
                row.link_check_status = Some(status);
                row.link_check_summary = Some(LinkCheckSummary {
                    total: row_total,
                    valid: row_valid,
                    broken: row_total - row_valid,
                    checked_at: Utc::now().timestamp_millis(),
                });
                self.history.upsert(&row).await?;
            }
        }

        let summary = LinkCheckSummary {
            total,
            valid,
            broken: total - valid,
            checked_at: Utc::now().timestamp_millis(),
        };
        info!(total, valid, broken = summary.broken, "link check finished");
        Ok(summary)
    }

    /// Probe one URL and classify the outcome.
    pub async fn probe(&self, url: &str, config: &LinkConfig) -> LinkCheckStatus {
        let request = if is_proxied(url, config) {
            // The proxy rejects HEAD; a one-byte ranged GET is the cheapest
            // equivalent.
            self.client.get(url).header(RANGE, "bytes=0-0")
        } else {
            self.client.head(url)
        };

        let started = Instant::now();
        let outcome = request.send().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => classify_status(response.status().as_u16(), elapsed_ms),
            Err(error) if error.is_timeout() => LinkCheckStatus {
                valid: false,
                status_code: None,
                error_type: LinkCheckErrorType::Timeout,
                suggestion: Some("The host did not answer in time; try again later.".to_string()),
                response_time_ms: Some(elapsed_ms),
                checked_at: Utc::now().timestamp_millis(),
            },
            Err(error) => {
                debug!(url, %error, "probe failed at the connection level");
                LinkCheckStatus {
                    valid: false,
                    status_code: None,
                    error_type: LinkCheckErrorType::Network,
                    suggestion: Some(
                        "Could not reach the host; check your connection or the proxy prefix."
                            .to_string(),
                    ),
                    response_time_ms: Some(elapsed_ms),
                    checked_at: Utc::now().timestamp_millis(),
                }
            }
        }
    }
}

fn is_proxied(url: &str, config: &LinkConfig) -> bool {
    config
        .known_prefixes
        .iter()
        .any(|p| !p.is_empty() && url.starts_with(p.as_str()))
}

fn classify_status(code: u16, elapsed_ms: u64) -> LinkCheckStatus {
    let checked_at = Utc::now().timestamp_millis();
    let (valid, error_type, suggestion) = match code {
        200..=399 => (true, LinkCheckErrorType::Success, None),
        400..=499 => (
            false,
            LinkCheckErrorType::Http4xx,
            Some("The file is gone or access was denied; re-upload it.".to_string()),
        ),
        _ => (
            false,
            LinkCheckErrorType::Http5xx,
            Some("The host is having trouble; the link may recover on its own.".to_string()),
        ),
    };
    LinkCheckStatus {
        valid,
        status_code: Some(code),
        error_type,
        suggestion,
        response_time_ms: Some(elapsed_ms),
        checked_at,
    }
}

/// Delete stale temp files left behind by interrupted re-uploads.
///
/// Only files carrying [`TEMP_PREFIX`] and older than one hour are touched.
/// Returns how many files were removed.
pub async fn sweep_temp_files(dir: &Path) -> AppResult<u32> {
    sweep_temp_files_older_than(dir, TEMP_MAX_AGE).await
}

async fn sweep_temp_files_older_than(dir: &Path, max_age: Duration) -> AppResult<u32> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| AppError::FileIo {
        message: format!("cannot read '{}': {e}", dir.display()),
    })?;

    let mut removed = 0u32;
    while let Some(entry) = entries.next_entry().await.map_err(|e| AppError::FileIo {
        message: format!("cannot walk '{}': {e}", dir.display()),
    })? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(TEMP_PREFIX) {
            continue;
        }

        let stale = entry
            .metadata()
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.elapsed().ok())
            .is_some_and(|age| age >= max_age);
        if !stale {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(error) => warn!(path = %entry.path().display(), %error, "temp sweep skipped file"),
        }
    }

    if removed > 0 {
        info!(removed, dir = %dir.display(), "stale temp files swept");
    }
    Ok(removed)
}
