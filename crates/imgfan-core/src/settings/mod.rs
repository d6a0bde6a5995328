//! Settings domain types and validation.
//!
//! Pure domain types with no infrastructure dependencies; the file-backed
//! store lives in [`store`].

mod store;

pub use store::JsonSettingsStore;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{ServiceId, WebDavProfile};
use crate::link::{LinkConfig, LinkOutputMode};

/// Default number of history rows per page.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 500;

/// Default cap on concurrent adapter calls across all items.
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 8;

/// Application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Destinations selected for new uploads, in preference order.
    pub enabled_services: Vec<ServiceId>,
    /// Destination preferred as primary; falls back to upload order.
    pub primary_service: Option<ServiceId>,
    /// The one service whose links are proxy-rewritten.
    pub proxied_service: ServiceId,
    /// Link output mode.
    pub output_mode: LinkOutputMode,
    /// Proxy prefix currently applied when generating links.
    pub active_proxy_prefix: String,
    /// Every proxy prefix ever configured; link inversion checks all.
    pub proxy_prefixes: Vec<String>,
    /// Backend-specific credentials, keyed by service. Opaque to the core.
    pub service_credentials: IndexMap<ServiceId, Value>,
    /// Named WebDAV sync targets.
    pub webdav_profiles: Vec<WebDavProfile>,
    /// Id of the active sync profile, if any.
    pub active_profile_id: Option<String>,
    /// History rows per page.
    pub history_page_size: u32,
    /// Global cap on concurrent adapter calls.
    pub max_concurrent_uploads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Settings {
    /// Create settings with sensible defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            enabled_services: Vec::new(),
            primary_service: None,
            proxied_service: ServiceId::new("weibo"),
            output_mode: LinkOutputMode::Direct,
            active_proxy_prefix: String::new(),
            proxy_prefixes: Vec::new(),
            service_credentials: IndexMap::new(),
            webdav_profiles: Vec::new(),
            active_profile_id: None,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
        }
    }

    /// The link generator's view of these settings.
    #[must_use]
    pub fn link_config(&self) -> LinkConfig {
        let mut known_prefixes = self.proxy_prefixes.clone();
        if !self.active_proxy_prefix.is_empty()
            && !known_prefixes.contains(&self.active_proxy_prefix)
        {
            known_prefixes.push(self.active_proxy_prefix.clone());
        }
        LinkConfig {
            proxied_service: self.proxied_service.clone(),
            output_mode: self.output_mode,
            active_prefix: self.active_proxy_prefix.clone(),
            known_prefixes,
        }
    }

    /// The active WebDAV profile, if one is selected and still exists.
    #[must_use]
    pub fn active_profile(&self) -> Option<&WebDavProfile> {
        let id = self.active_profile_id.as_deref()?;
        self.webdav_profiles.iter().find(|p| p.id == id)
    }

    /// Credentials for one service; `null` when none are stored.
    #[must_use]
    pub fn credentials_for(&self, service: &ServiceId) -> Value {
        self.service_credentials
            .get(service)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Merge a partial update, only touching fields that are `Some`.
    pub fn merge(&mut self, update: &SettingsUpdate) {
        if let Some(ref services) = update.enabled_services {
            self.enabled_services.clone_from(services);
        }
        if let Some(ref primary) = update.primary_service {
            self.primary_service.clone_from(primary);
        }
        if let Some(ref mode) = update.output_mode {
            self.output_mode = *mode;
        }
        if let Some(ref prefix) = update.active_proxy_prefix {
            // A prefix once used must remain strippable forever.
            if !prefix.is_empty() && !self.proxy_prefixes.contains(prefix) {
                self.proxy_prefixes.push(prefix.clone());
            }
            self.active_proxy_prefix.clone_from(prefix);
        }
        if let Some(ref credentials) = update.service_credentials {
            for (service, value) in credentials {
                self.service_credentials
                    .insert(service.clone(), value.clone());
            }
        }
        if let Some(ref profiles) = update.webdav_profiles {
            self.webdav_profiles.clone_from(profiles);
        }
        if let Some(ref profile_id) = update.active_profile_id {
            self.active_profile_id.clone_from(profile_id);
        }
        if let Some(page_size) = update.history_page_size {
            self.history_page_size = page_size;
        }
        if let Some(max) = update.max_concurrent_uploads {
            self.max_concurrent_uploads = max;
        }
    }
}

/// Partial settings update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsUpdate {
    /// New destination selection.
    pub enabled_services: Option<Vec<ServiceId>>,
    /// New primary preference (`Some(None)` clears it).
    pub primary_service: Option<Option<ServiceId>>,
    /// New output mode.
    pub output_mode: Option<LinkOutputMode>,
    /// New active proxy prefix.
    pub active_proxy_prefix: Option<String>,
    /// Credentials to upsert per service.
    pub service_credentials: Option<IndexMap<ServiceId, Value>>,
    /// Replacement profile list.
    pub webdav_profiles: Option<Vec<WebDavProfile>>,
    /// New active profile selection (`Some(None)` clears it).
    pub active_profile_id: Option<Option<String>>,
    /// New page size.
    pub history_page_size: Option<u32>,
    /// New concurrency cap.
    pub max_concurrent_uploads: Option<usize>,
}

/// Settings validation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// Page size outside the accepted range.
    #[error("history page size must be between 1 and 10000, got {0}")]
    InvalidPageSize(u32),

    /// Concurrency cap outside the accepted range.
    #[error("max concurrent uploads must be between 1 and 64, got {0}")]
    InvalidConcurrency(usize),

    /// The active profile id points at no configured profile.
    #[error("active profile '{0}' does not exist")]
    UnknownActiveProfile(String),

    /// A profile is missing a required field.
    #[error("profile '{0}' is incomplete: {1}")]
    IncompleteProfile(String, String),
}

/// Validate a full settings value before persisting it.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    if settings.history_page_size == 0 || settings.history_page_size > 10_000 {
        return Err(SettingsError::InvalidPageSize(settings.history_page_size));
    }
    if settings.max_concurrent_uploads == 0 || settings.max_concurrent_uploads > 64 {
        return Err(SettingsError::InvalidConcurrency(
            settings.max_concurrent_uploads,
        ));
    }
    if let Some(ref id) = settings.active_profile_id {
        if !settings.webdav_profiles.iter().any(|p| &p.id == id) {
            return Err(SettingsError::UnknownActiveProfile(id.clone()));
        }
    }
    for profile in &settings.webdav_profiles {
        if profile.url.is_empty() {
            return Err(SettingsError::IncompleteProfile(
                profile.id.clone(),
                "url is empty".to_string(),
            ));
        }
    }
    Ok(())
}
