//! Release metadata: what is installed, what the update server offers, and
//! the outcome of comparing the two.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ReleaseChannel;
use crate::version::{Version, VersionParseError};

/// Published digests of a release artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub sha256: String,
    #[serde(default)]
    pub md5: String,
}

/// A concrete release, either the running build or one advertised by a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: Version,
    /// Canonical rendering of `version`
    pub version_string: String,
    pub release_date: DateTime<Utc>,
    pub channel: ReleaseChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksums: Option<Checksums>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Artifact size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl VersionInfo {
    /// Build release info for `version`; the channel is derived from its prerelease tag.
    pub fn new(version: Version, release_date: DateTime<Utc>) -> Self {
        Self {
            version_string: version.to_string(),
            channel: version.channel(),
            version,
            release_date,
            changelog: None,
            download_url: None,
            checksums: None,
            signature: None,
            size: None,
        }
    }

    pub fn parse(version: &str, release_date: DateTime<Utc>) -> Result<Self, VersionParseError> {
        Ok(Self::new(Version::parse(version)?, release_date))
    }

    pub fn with_channel(mut self, channel: ReleaseChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_changelog(mut self, changelog: impl Into<String>) -> Self {
        self.changelog = Some(changelog.into());
        self
    }

    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.checksums = Some(Checksums {
            sha256: sha256.into(),
            md5: String::new(),
        });
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Published SHA-256, if any
    pub fn expected_sha256(&self) -> Option<&str> {
        self.checksums
            .as_ref()
            .map(|c| c.sha256.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_os_version: Option<String>,
    /// Free disk space in MB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_space: Option<u64>,
}

/// Human-oriented notes for one release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub version: VersionInfo,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub bugfixes: Vec<String>,
    #[serde(default)]
    pub breaking: Vec<String>,
    #[serde(default)]
    pub security: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<ReleaseRequirements>,
}

/// Remote description of the latest release per channel plus support policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    pub latest_versions: BTreeMap<ReleaseChannel, VersionInfo>,
    /// Oldest version still supported
    pub minimum_version: String,
    /// Versions that must be replaced
    #[serde(default)]
    pub deprecated_versions: Vec<String>,
    #[serde(default)]
    pub release_notes: Vec<ReleaseInfo>,
}

impl UpdateManifest {
    pub fn latest_for(&self, channel: ReleaseChannel) -> Option<&VersionInfo> {
        self.latest_versions.get(&channel)
    }

    pub fn is_deprecated(&self, version_string: &str) -> bool {
        self.deprecated_versions.iter().any(|v| v == version_string)
    }
}

/// Outcome of one update check. Treated as immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckResult {
    pub has_update: bool,
    pub current_version: VersionInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<VersionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_available: Option<VersionInfo>,
    pub is_downgrade: bool,
    pub last_checked: DateTime<Utc>,
    /// Set when the check failed open; the message is safe to show to a user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateCheckResult {
    /// Compare `current` against the manifest entry for its channel.
    pub fn evaluate(
        current: VersionInfo,
        latest: Option<VersionInfo>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let has_update = latest
            .as_ref()
            .is_some_and(|l| current.version.is_older_than(&l.version));
        let is_downgrade = latest
            .as_ref()
            .is_some_and(|l| current.version.compare(&l.version).is_gt());

        Self {
            has_update,
            update_available: if has_update { latest.clone() } else { None },
            latest_version: latest,
            current_version: current,
            is_downgrade,
            last_checked: checked_at,
            error: None,
        }
    }

    /// Result reported when the manifest could not be obtained.
    pub fn failed_open(
        current: VersionInfo,
        checked_at: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            has_update: false,
            current_version: current,
            latest_version: None,
            update_available: None,
            is_downgrade: false,
            last_checked: checked_at,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
