pub mod core;

#[cfg(test)]
mod test_mock_data;

// Re-export commonly used types
pub use crate::core::config::{Config, FeedFormat, ProxyConfig};
pub use crate::core::config_manager::DataPaths;
pub use crate::core::host::{
    AuditEvent, AuditLog, ClickHandler, LogAuditLog, LogRenderer, Notifier, RendererChannel,
};
pub use crate::core::updater::{
    UpdateChecker, UpdateDownloader, UpdateError, UpdateResult, UpdateSettings, UpdateSettingsPatch,
    VersionManager,
};
pub use upkeep_event_bus::{DownloadBusContainer, DownloadEvent, UpdateBusContainer, UpdateEvent};
pub use upkeep_types::{
    DownloadProgress, DownloadResult, ReleaseChannel, UpdateCheckResult, UpdateManifest, Version,
    VersionInfo,
};
