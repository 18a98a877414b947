//! Worker configuration.
//!
//! Everything the worker would otherwise hard-code (bucket version, install
//! manifest, API prefix, sync tags and endpoints, notification defaults)
//! lives in [`WorkerConfig`] and is injected at startup.
//!
//! Configuration is stored at `~/.config/swaed-worker/config.json`. Missing
//! fields take their default values.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::WorkerError;
use crate::queue::ActionKind;

/// Application name used for config/state directory paths
pub const APP_NAME: &str = "swaed-worker";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Current cache bucket. Bumping the suffix invalidates every older bucket
/// on the next activation.
pub const DEFAULT_BUCKET_NAME: &str = "swaed-uae-v1";

pub const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";

pub const DEFAULT_API_PREFIX: &str = "/api/";

pub const DEFAULT_PERIODIC_TAG: &str = "update-volunteer-data";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingKindConfig {
    pub kind: ActionKind,
    /// Background-sync tag that triggers a flush of this kind
    pub tag: String,
    /// Endpoint each queued payload is POSTed to
    pub endpoint: String,
    /// Durable-store key holding the queued list
    pub storage_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicSyncConfig {
    pub tag: String,
    /// Read endpoints re-fetched and re-cached on every periodic trigger
    pub urls: Vec<String>,
}

impl Default for PeriodicSyncConfig {
    fn default() -> Self {
        Self {
            tag: DEFAULT_PERIODIC_TAG.to_string(),
            urls: vec![
                "/api/volunteer/profile".to_string(),
                "/api/opportunities".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub default_title: String,
    pub default_body: String,
    pub default_url: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "SwaedUAE".to_string(),
            default_body: "You have a new notification from SwaedUAE".to_string(),
            default_url: "/".to_string(),
            icon: "https://cdn-icons-png.flaticon.com/512/3135/3135715.png".to_string(),
            badge: "https://cdn-icons-png.flaticon.com/512/3135/3135715.png".to_string(),
            vibrate: vec![100, 50, 100],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub bucket_name: String,
    /// URLs fetched and stored verbatim at install
    pub static_manifest: Vec<String>,
    /// Page served when a document request fails at the network
    pub offline_page: String,
    pub api_prefix: String,
    pub pending_action_kinds: Vec<PendingKindConfig>,
    pub periodic_sync: PeriodicSyncConfig,
    pub notifications: NotificationConfig,
    /// Origin relative URLs are resolved against by the HTTP network
    pub origin: Option<String>,
    /// Per-request timeout; `None` waits indefinitely
    pub request_timeout_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bucket_name: DEFAULT_BUCKET_NAME.to_string(),
            static_manifest: vec![
                "/".to_string(),
                DEFAULT_OFFLINE_PAGE.to_string(),
                "/manifest.json".to_string(),
                "/static/js/bundle.js".to_string(),
                "/static/css/main.css".to_string(),
                "https://cdn-icons-png.flaticon.com/512/3135/3135715.png".to_string(),
            ],
            offline_page: DEFAULT_OFFLINE_PAGE.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            pending_action_kinds: ActionKind::ALL
                .iter()
                .map(|kind| PendingKindConfig {
                    kind: *kind,
                    tag: kind.default_tag().to_string(),
                    endpoint: kind.default_endpoint().to_string(),
                    storage_key: kind.default_storage_key().to_string(),
                })
                .collect(),
            periodic_sync: PeriodicSyncConfig::default(),
            notifications: NotificationConfig::default(),
            origin: None,
            request_timeout_secs: None,
        }
    }
}

impl WorkerConfig {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Self = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding cache buckets and the durable store.
    pub fn state_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Check invariants the worker relies on.
    pub fn validate(&self) -> std::result::Result<(), WorkerError> {
        if self.bucket_name.trim().is_empty() {
            return Err(WorkerError::Config("bucket_name must not be empty".into()));
        }
        if !self.api_prefix.starts_with('/') {
            return Err(WorkerError::Config(format!(
                "api_prefix must start with '/': {}",
                self.api_prefix
            )));
        }

        let mut tags = HashSet::new();
        let mut keys = HashSet::new();
        for kind in &self.pending_action_kinds {
            if !tags.insert(kind.tag.as_str()) {
                return Err(WorkerError::Config(format!("duplicate sync tag: {}", kind.tag)));
            }
            if !keys.insert(kind.storage_key.as_str()) {
                return Err(WorkerError::Config(format!(
                    "duplicate storage key: {}",
                    kind.storage_key
                )));
            }
        }

        // Not fatal: navigation falls back to a generated page instead.
        if !self.static_manifest.iter().any(|u| u == &self.offline_page) {
            warn!(
                offline_page = %self.offline_page,
                "Offline page is not in the install manifest"
            );
        }
        Ok(())
    }

    pub fn kind_for_tag(&self, tag: &str) -> Option<&PendingKindConfig> {
        self.pending_action_kinds.iter().find(|k| k.tag == tag)
    }

    pub fn kind_config(&self, kind: ActionKind) -> Option<&PendingKindConfig> {
        self.pending_action_kinds.iter().find(|k| k.kind == kind)
    }

    pub fn is_api_path(&self, path: &str) -> bool {
        path.starts_with(&self.api_prefix)
    }
}
