use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

pub const ENV_API_ORIGIN: &str = "QILLQAY_API_ORIGIN";
pub const ENV_API_BASE: &str = "QILLQAY_API_BASE";
pub const ENV_LISTEN_ADDR: &str = "QILLQAY_LISTEN_ADDR";
/// Path of the JSON settings file read by the binary.
pub const ENV_SETTINGS_PATH: &str = "QILLQAY_SETTINGS";

// App settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Scheme, host and port of the backend (or of the proxy in front of it).
    pub api_origin: String,
    pub api_base_path: String,
    /// Quiet period after a block edit before saving, in milliseconds.
    pub debounce_blocks: u64,
    /// Quiet period after a title edit before saving, in milliseconds.
    pub debounce_title: u64,
    /// Skip the request when the content equals the last confirmed save.
    pub skip_unchanged: bool,
    pub request_timeout_ms: Option<u64>,
    /// Bind address of the development backend.
    pub listen_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_origin: "http://127.0.0.1:3000".to_string(),
            api_base_path: "/api/v1".to_string(),
            debounce_blocks: 2000,
            debounce_title: 1000,
            skip_unchanged: true,
            request_timeout_ms: None,
            listen_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Timing knobs handed to each autosave coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    pub debounce_blocks: Duration,
    pub debounce_title: Duration,
    pub skip_unchanged: bool,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Settings::default().autosave()
    }
}

impl Settings {
    pub fn autosave(&self) -> AutosaveConfig {
        AutosaveConfig {
            debounce_blocks: Duration::from_millis(self.debounce_blocks),
            debounce_title: Duration::from_millis(self.debounce_title),
            skip_unchanged: self.skip_unchanged,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Full base URL of the page collection API, e.g. `http://host/api/v1`.
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        let origin = self.api_origin.trim().trim_end_matches('/');
        let path = self.api_base_path.trim().trim_matches('/');
        let joined = if path.is_empty() {
            format!("{}/", origin)
        } else {
            format!("{}/{}", origin, path)
        };

        let url = Url::parse(&joined).map_err(|e| ConfigError::InvalidOrigin {
            origin: self.api_origin.clone(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::InvalidOrigin {
                origin: self.api_origin.clone(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    /// Apply `QILLQAY_*` overrides using the given variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(origin) = lookup(ENV_API_ORIGIN).filter(|v| !v.trim().is_empty()) {
            self.api_origin = origin;
        }
        if let Some(base) = lookup(ENV_API_BASE).filter(|v| !v.trim().is_empty()) {
            self.api_base_path = base;
        }
        if let Some(addr) = lookup(ENV_LISTEN_ADDR).filter(|v| !v.trim().is_empty()) {
            self.listen_addr = addr;
        }
    }
}

// Load settings from disk, falling back to defaults
pub fn load_settings(path: Option<&Path>) -> Settings {
    let from_file = path.filter(|p| p.exists()).and_then(|p| {
        match std::fs::read_to_string(p) {
            Ok(content) => match serde_json::from_str::<Settings>(&content) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "ignoring unreadable settings file");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(path = %p.display(), error = %e, "failed to read settings file");
                None
            }
        }
    });

    let mut settings = from_file.unwrap_or_default();
    settings.apply_env(|key| std::env::var(key).ok());
    settings
}
