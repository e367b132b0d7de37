use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::core::config::Config;

/// Get the user data directory for Upkeep
/// - macOS: ~/.upkeep/
/// - Windows: %APPDATA%\upkeep\
/// - Linux: ~/.config/upkeep/
pub fn get_user_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get home directory"))?;
        Ok(home.join(".upkeep"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get AppData directory"))?;
        Ok(appdata.join("upkeep"))
    }

    #[cfg(target_os = "linux")]
    {
        let config = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?;
        Ok(config.join("upkeep"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        Err(anyhow::anyhow!("Unsupported platform"))
    }
}

/// Files owned by one running instance. Nothing here is locked across
/// processes, so only one instance may use a data directory at a time.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths under the per-user data directory
    pub fn user() -> Result<Self> {
        Ok(Self::new(get_user_data_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("update-settings.json")
    }

    pub fn updates_dir(&self) -> PathBuf {
        self.root.join("updates")
    }
}

/// Load the config at `path`. A missing file yields the defaults; an
/// unreadable or malformed one is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::info!("Config file not found, using defaults: {:?}", path);
        return Ok(Config::default());
    }

    let config_content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = serde_json::from_str(&config_content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    log::info!("Using config file: {:?}", path);
    Ok(config)
}

/// Load config from the user data directory
pub fn load_user_config() -> Result<Config> {
    load_config(&DataPaths::user()?.config_file())
}
