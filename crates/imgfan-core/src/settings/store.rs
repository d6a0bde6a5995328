//! File-backed settings store.
//!
//! One JSON file on disk, guarded by a single global mutex that is held
//! across the whole read-parse-merge-write cycle so concurrent saves from
//! different windows cannot overwrite each other's changes.
//!
//! Recovery policy:
//!
//! - Read of a corrupt file: the file is renamed to a timestamped backup
//!   and defaults are returned; nothing is silently discarded.
//! - Write when the existing file cannot be parsed: the write is aborted
//!   entirely rather than risking overwriting un-migrated data, and the
//!   corrupt file is preserved for forensic recovery.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Settings, SettingsUpdate, validate_settings};
use crate::errors::{AppError, StorageError};
use crate::events::AppEvent;
use crate::ports::AppEventEmitter;

/// JSON settings store with serialized read-modify-write.
pub struct JsonSettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
    emitter: Arc<dyn AppEventEmitter>,
}

impl JsonSettingsStore {
    /// Create a store backed by `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>, emitter: Arc<dyn AppEventEmitter>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            emitter,
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load current settings.
    ///
    /// A missing file yields defaults. A corrupt file is moved aside to a
    /// timestamped backup and defaults are returned.
    pub async fn load(&self) -> Result<Settings, StorageError> {
        let _guard = self.lock.lock().await;
        self.read_or_recover().await
    }

    /// Apply a partial update through a full read-parse-merge-write cycle.
    ///
    /// Returns the settings as persisted. Aborts without touching the file
    /// when the existing content cannot be parsed.
    pub async fn save(&self, update: &SettingsUpdate) -> Result<Settings, AppError> {
        let _guard = self.lock.lock().await;

        let mut settings = match self.read_existing().await? {
            Some(existing) => existing,
            None => Settings::with_defaults(),
        };
        settings.merge(update);
        validate_settings(&settings).map_err(|e| AppError::config(e.to_string()))?;

        self.write_atomic(&settings).await?;
        self.emitter.emit(AppEvent::ConfigUpdated);
        Ok(settings)
    }

    /// Replace the whole settings value (used by config sync download).
    pub async fn replace(&self, settings: &Settings) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        validate_settings(settings).map_err(|e| AppError::config(e.to_string()))?;
        self.write_atomic(settings).await?;
        self.emitter.emit(AppEvent::ConfigUpdated);
        Ok(())
    }

    /// Read for the load path: corrupt content is moved aside and replaced
    /// with defaults.
    async fn read_or_recover(&self) -> Result<Settings, StorageError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::with_defaults());
            }
            Err(err) => return Err(StorageError::read(err)),
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                let backup = self.backup_path();
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %err,
                    "settings file corrupt, moving aside and using defaults"
                );
                tokio::fs::rename(&self.path, &backup)
                    .await
                    .map_err(StorageError::read)?;
                Ok(Settings::with_defaults())
            }
        }
    }

    /// Read for the write path: corrupt content aborts, preserving the
    /// file as a backup.
    async fn read_existing(&self) -> Result<Option<Settings>, StorageError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::read(err)),
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => Ok(Some(settings)),
            Err(err) => {
                let backup = self.backup_path();
                let _ = tokio::fs::copy(&self.path, &backup).await;
                Err(StorageError::write(format!(
                    "existing settings at {} are unparsable ({err}); write aborted, backup at {}",
                    self.path.display(),
                    backup.display()
                )))
            }
        }
    }

    async fn write_atomic(&self, settings: &Settings) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StorageError::write)?;
        }

        let json = serde_json::to_string_pretty(settings).map_err(StorageError::write)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(StorageError::write)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(StorageError::write)?;

        info!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        self.path.with_extension(format!("json.{stamp}.bak"))
    }
}
