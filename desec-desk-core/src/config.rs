//! Per-profile settings.
//!
//! Every setting is an explicit field with a default; unknown keys found on
//! disk are preserved across a save (forward compatibility) but never
//! interpreted. The theme tag is passed through to the shell unmodified.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::credentials::SealedToken;
use crate::error::CoreResult;
use crate::util::fs::atomic_write;

/// Default API base URL.
pub const DEFAULT_API_URL: &str = "https://desec.io/api/v1";

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_sync_interval() -> u32 {
    15
}

fn default_rate_limit() -> f64 {
    2.0
}

fn default_theme() -> String {
    "light".to_string()
}

fn default_true() -> bool {
    true
}

fn default_keepalive() -> u64 {
    60
}

fn default_http_timeout() -> u64 {
    30
}

fn default_history_limit() -> usize {
    5000
}

/// Settings stored in a profile's `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// The API token, sealed at rest; never stored in plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_token: Option<SealedToken>,

    /// Zone-list staleness threshold in minutes (1–60).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_minutes: u32,

    /// Outbound requests per second (0–10; 0 disables limiting).
    #[serde(default = "default_rate_limit")]
    pub api_rate_limit: f64,

    /// Theme tag; not interpreted by the core.
    #[serde(default = "default_theme")]
    pub theme: String,

    #[serde(default)]
    pub debug_mode: bool,

    #[serde(default = "default_true")]
    pub show_log_console: bool,

    #[serde(default = "default_true")]
    pub show_multiline_records: bool,

    #[serde(default)]
    pub offline_mode: bool,

    /// Connectivity check interval in seconds; 0 disables the keepalive.
    #[serde(default = "default_keepalive")]
    pub keepalive_interval_secs: u64,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default)]
    pub queue_history_persist: bool,

    #[serde(default = "default_history_limit")]
    pub queue_history_limit: usize,

    /// Keys this version does not know about; preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            sealed_token: None,
            sync_interval_minutes: default_sync_interval(),
            api_rate_limit: default_rate_limit(),
            theme: default_theme(),
            debug_mode: false,
            show_log_console: true,
            show_multiline_records: true,
            offline_mode: false,
            keepalive_interval_secs: default_keepalive(),
            http_timeout_secs: default_http_timeout(),
            queue_history_persist: false,
            queue_history_limit: default_history_limit(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`. A missing or unparseable file yields the
    /// defaults; a parse failure is logged, not raised.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<Settings>(&text) {
                Ok(settings) => settings.clamped(),
                Err(e) => {
                    log::error!("Failed to parse {}: {e}; using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                log::error!("Failed to read {}: {e}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Saves settings atomically as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let json = serde_json::to_vec_pretty(&self.clone().clamped())?;
        atomic_write(path, &json)?;
        log::debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Clamps range-bound settings into their documented bounds.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.sync_interval_minutes = self.sync_interval_minutes.clamp(1, 60);
        self.api_rate_limit = self.api_rate_limit.clamp(0.0, 10.0);
        self
    }
}
