//! User-facing update preferences and their JSON persistence.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use upkeep_types::ReleaseChannel;

use super::error::{UpdateError, UpdateResult};

/// Shortest interval honoured between automatic checks, in hours.
pub const MIN_CHECK_INTERVAL_HOURS: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateSettings {
    pub auto_check: bool,
    pub auto_download: bool,
    pub auto_install: bool,
    /// Hours between automatic checks
    pub check_interval: u32,
    pub channel: ReleaseChannel,
    pub notify_on_update: bool,
    /// Overrides the per-user download directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            auto_check: true,
            auto_download: false,
            auto_install: false,
            check_interval: 24,
            channel: ReleaseChannel::Stable,
            notify_on_update: true,
            download_path: None,
            last_check: None,
            last_update: None,
        }
    }
}

impl UpdateSettings {
    /// Check interval as a duration, never shorter than [`MIN_CHECK_INTERVAL_HOURS`].
    pub fn check_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(self.check_interval.max(MIN_CHECK_INTERVAL_HOURS) as i64)
    }

    /// Same interval for timers
    pub fn check_interval_std(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.check_interval.max(MIN_CHECK_INTERVAL_HOURS) as u64 * 60 * 60,
        )
    }
}

/// Partial settings update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_check: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_download: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_install: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<ReleaseChannel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_on_update: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

impl UpdateSettingsPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, settings: &mut UpdateSettings) {
        if let Some(v) = self.auto_check {
            settings.auto_check = v;
        }
        if let Some(v) = self.auto_download {
            settings.auto_download = v;
        }
        if let Some(v) = self.auto_install {
            settings.auto_install = v;
        }
        if let Some(v) = self.check_interval {
            settings.check_interval = v;
        }
        if let Some(v) = self.channel {
            settings.channel = v;
        }
        if let Some(v) = self.notify_on_update {
            settings.notify_on_update = v;
        }
        if let Some(v) = &self.download_path {
            settings.download_path = Some(v.clone());
        }
        if let Some(v) = self.last_check {
            settings.last_check = Some(v);
        }
        if let Some(v) = self.last_update {
            settings.last_update = Some(v);
        }
    }
}

/// File-backed settings storage.
///
/// Assumes a single running application instance; concurrent writers from
/// several processes would overwrite each other.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings merged over the defaults.
    ///
    /// A missing file yields the defaults; an unreadable or corrupt file is
    /// logged and also yields the defaults.
    pub fn load(&self) -> UpdateSettings {
        if !self.path.exists() {
            return UpdateSettings::default();
        }

        let loaded = std::fs::read_to_string(&self.path)
            .map_err(UpdateError::from)
            .and_then(|content| serde_json::from_str(&content).map_err(UpdateError::from));

        match loaded {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!(
                    target: "version",
                    "Could not load update settings, using defaults: error={} path={:?}",
                    e,
                    self.path
                );
                UpdateSettings::default()
            }
        }
    }

    /// Write settings synchronously, creating the parent directory if needed.
    pub fn save(&self, settings: &UpdateSettings) -> UpdateResult<()> {
        let to_settings_error = |e: &dyn std::fmt::Display| UpdateError::Settings {
            path: self.path.clone(),
            message: e.to_string(),
        };

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| to_settings_error(&e))?;
            }
        }

        let content = serde_json::to_string_pretty(settings).map_err(|e| to_settings_error(&e))?;
        std::fs::write(&self.path, content).map_err(|e| to_settings_error(&e))?;

        log::debug!(target: "version", "Update settings saved: path={:?}", self.path);
        Ok(())
    }
}
