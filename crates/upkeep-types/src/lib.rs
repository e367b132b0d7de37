//! Shared data model for upkeep: semantic versions, release channels,
//! manifests, check results and download reporting.

pub mod channel;
pub mod download;
pub mod release;
pub mod version;

pub use channel::ReleaseChannel;
pub use download::{DownloadFailure, DownloadProgress, DownloadResult, format_bytes};
pub use release::{
    Checksums, ReleaseInfo, ReleaseRequirements, UpdateCheckResult, UpdateManifest, VersionInfo,
};
pub use version::{
    Version, VersionBump, VersionParseError, compare_versions, is_newer_version,
};
