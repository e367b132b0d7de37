use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::updater::ManifestPolicy;

pub const DEFAULT_UPDATE_SERVER: &str = "https://api.github.com/repos/upkeep-app/upkeep";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the release feed
    #[serde(default = "default_update_server")]
    pub update_server: String,
    #[serde(default)]
    pub feed_format: FeedFormat,
    /// Product name used for artifact files and notifications
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Used by the GitHub feed, which has no policy of its own
    #[serde(default = "default_minimum_version")]
    pub minimum_version: String,
    #[serde(default)]
    pub deprecated_versions: Vec<String>,
    /// Network proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Shape of the document behind `update_server`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    /// GitHub "latest release" API
    #[default]
    Github,
    /// Native `manifest.json`
    Manifest,
}

fn default_update_server() -> String {
    DEFAULT_UPDATE_SERVER.to_string()
}

fn default_app_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_startup_delay_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_progress_interval_ms() -> u64 {
    100
}

fn default_minimum_version() -> String {
    "0.0.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_server: default_update_server(),
            feed_format: FeedFormat::default(),
            app_name: default_app_name(),
            startup_delay_secs: default_startup_delay_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            minimum_version: default_minimum_version(),
            deprecated_versions: Vec::new(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl Config {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn manifest_policy(&self) -> ManifestPolicy {
        ManifestPolicy {
            minimum_version: self.minimum_version.clone(),
            deprecated_versions: self.deprecated_versions.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Enable proxy
    #[serde(default)]
    pub enabled: bool,
    /// Proxy type: http, https, socks5
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    /// Username for proxy authentication
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_proxy_type() -> String {
    "http".to_string()
}

impl ProxyConfig {
    /// Proxy URL for the HTTP client, `None` when disabled
    pub fn to_proxy_url(&self) -> Option<String> {
        if !self.enabled || self.host.is_empty() {
            return None;
        }

        let auth = if !self.username.is_empty() {
            format!("{}:{}@", self.username, self.password)
        } else {
            String::new()
        };

        let scheme = if self.proxy_type.is_empty() {
            "http"
        } else {
            self.proxy_type.as_str()
        };

        Some(format!("{}://{}{}:{}", scheme, auth, self.host, self.port))
    }
}
