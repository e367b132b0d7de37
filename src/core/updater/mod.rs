mod checker;
mod clock;
mod downloader;
mod error;
mod feed;
mod manager;
mod settings;
mod transport;
mod verify;

pub use checker::{CheckerStatus, DEFAULT_STARTUP_DELAY, UpdateChecker, UpdateCheckerBuilder, VersionSupport};
pub use clock::{Clock, SystemClock};
pub use downloader::{DEFAULT_PROGRESS_INTERVAL, DownloadSession, UpdateDownloader};
pub use error::{UpdateError, UpdateResult};
pub use feed::{
    DEFAULT_REQUEST_TIMEOUT, GitHubReleaseFeed, ManifestFeed, ManifestPolicy, ReleaseFeed,
    installer_extensions,
};
pub use manager::{SystemInfo, VersionManager};
pub use settings::{MIN_CHECK_INTERVAL_HOURS, SettingsStore, UpdateSettings, UpdateSettingsPatch};
pub use transport::{ArtifactSource, ArtifactStream, HttpArtifactSource, build_http_client};
pub use verify::{calculate_sha256, verify_sha256};
