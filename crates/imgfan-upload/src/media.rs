//! Image metadata probing.
//!
//! Header-only dimension sniffing; the file is never fully decoded. A
//! background pass uses this to patch history rows that predate dimension
//! tracking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use imagesize::ImageType;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use imgfan_core::errors::{AppError, AppResult};
use imgfan_core::ports::{HistoryRepository, HistoryScan};

/// Metadata sniffed from an image header.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    /// `width / height`.
    pub aspect_ratio: f64,
    /// File size in bytes.
    pub file_size: u64,
    /// Detected container format, `"unknown"` when undetected.
    pub format: String,
}

/// Sniff dimensions and format from the file header.
pub async fn probe_image(path: &Path) -> AppResult<ImageMeta> {
    let path: PathBuf = path.to_path_buf();
    let meta = tokio::task::spawn_blocking(move || probe_blocking(&path))
        .await
        .map_err(|e| AppError::External {
            message: format!("metadata probe task failed: {e}"),
        })??;
    Ok(meta)
}

fn probe_blocking(path: &Path) -> AppResult<ImageMeta> {
    let file_size = std::fs::metadata(path)
        .map_err(|e| AppError::FileIo {
            message: format!("cannot stat '{}': {e}", path.display()),
        })?
        .len();

    let size = imagesize::size(path).map_err(|e| AppError::Validation {
        message: format!("'{}' is not a recognized image: {e}", path.display()),
    })?;

    let header = read_header(path)?;
    let format = imagesize::image_type(&header)
        .map(format_name)
        .unwrap_or("unknown");

    let width = size.width as u32;
    let height = size.height as u32;
    Ok(ImageMeta {
        width,
        height,
        aspect_ratio: if height == 0 {
            0.0
        } else {
            f64::from(width) / f64::from(height)
        },
        file_size,
        format: format.to_string(),
    })
}

fn read_header(path: &Path) -> AppResult<Vec<u8>> {
    use std::io::Read;

    let mut file = std::fs::File::open(path).map_err(|e| AppError::FileIo {
        message: format!("cannot open '{}': {e}", path.display()),
    })?;
    let mut header = vec![0u8; 64];
    let n = file.read(&mut header).map_err(|e| AppError::FileIo {
        message: format!("cannot read '{}': {e}", path.display()),
    })?;
    header.truncate(n);
    Ok(header)
}

fn format_name(kind: ImageType) -> &'static str {
    match kind {
        ImageType::Png => "png",
        ImageType::Jpeg => "jpeg",
        ImageType::Gif => "gif",
        ImageType::Webp => "webp",
        ImageType::Bmp => "bmp",
        ImageType::Tiff => "tiff",
        ImageType::Ico => "ico",
        _ => "unknown",
    }
}

/// Patch missing width/height on history rows, in batches.
///
/// Rows without a surviving local file are skipped, not failed. Returns how
/// many rows were patched.
pub async fn fix_missing_dimensions(
    history: Arc<dyn HistoryRepository>,
    batch_size: u32,
    cancel: &CancellationToken,
) -> AppResult<u32> {
    let mut scan = HistoryScan::new(Arc::clone(&history), batch_size);
    let mut patched = 0u32;

    while let Some(batch) = scan.next_batch().await? {
        for mut row in batch {
            if cancel.is_cancelled() {
                info!(patched, "metadata fix cancelled");
                return Ok(patched);
            }
            if row.width.is_some() && row.height.is_some() {
                continue;
            }
            let Some(path) = row.file_path.clone() else {
                continue;
            };
            match probe_image(Path::new(&path)).await {
                Ok(meta) => {
                    row.width = Some(meta.width);
                    row.height = Some(meta.height);
                    history.upsert(&row).await?;
                    patched += 1;
                }
                Err(error) => {
                    debug!(id = %row.id, %error, "metadata probe skipped row");
                }
            }
        }
    }

    if patched > 0 {
        info!(patched, "metadata fix finished");
    } else {
        debug!("metadata fix found nothing to patch");
    }
    Ok(patched)
}

/// Log-and-continue wrapper for running the fix as a background job.
pub async fn fix_missing_dimensions_background(
    history: Arc<dyn HistoryRepository>,
    batch_size: u32,
    cancel: CancellationToken,
) {
    if let Err(error) = fix_missing_dimensions(history, batch_size, &cancel).await {
        warn!(%error, "metadata fix failed");
    }
}
