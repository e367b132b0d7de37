use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::ReleaseChannel;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-([a-zA-Z0-9.-]+))?(?:\+([a-zA-Z0-9.-]+))?$")
        .expect("version pattern is a valid regex")
});

/// Raised when a string is not a `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]` version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid version string: {input}")]
pub struct VersionParseError {
    pub input: String,
}

/// Which field [`Version::next`] increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionBump {
    Major,
    Minor,
    Patch,
}

/// A semantic version in the simplified form used for release tracking.
///
/// Equality is structural (build metadata included). Precedence is a separate
/// relation, see [`Version::compare`], which is why `Version` does not
/// implement `Ord`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    pub fn with_prerelease(mut self, prerelease: impl Into<String>) -> Self {
        self.prerelease = Some(prerelease.into());
        self
    }

    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }

    /// Parse a version string like "1.2.3", "2.0.0-beta.1" or "1.0.0-rc.1+build.5".
    ///
    /// A leading `v` is not accepted here; callers that read release tags strip it.
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let invalid = || VersionParseError {
            input: s.to_string(),
        };

        let captures = VERSION_PATTERN.captures(s).ok_or_else(invalid)?;
        let number = |index: usize| -> Result<u64, VersionParseError> {
            captures[index].parse().map_err(|_| invalid())
        };

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            prerelease: captures.get(4).map(|m| m.as_str().to_string()),
            build: captures.get(5).map(|m| m.as_str().to_string()),
        })
    }

    /// `true` if `s` would parse.
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    /// Precedence between two versions.
    ///
    /// Numeric on major, minor, patch. On a tie a prerelease sorts below the
    /// plain release, and two prerelease tags compare as plain strings (not the
    /// dotted-identifier rules of full SemVer). Build metadata is ignored.
    pub fn compare(&self, other: &Version) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }

    /// Check if `target` is a newer release than this version
    pub fn is_older_than(&self, target: &Version) -> bool {
        self.compare(target) == Ordering::Less
    }

    /// Same major and minor line.
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor
    }

    /// The next release of the given kind. Lower fields are zeroed and the
    /// prerelease and build tags are dropped.
    pub fn next(&self, bump: VersionBump) -> Version {
        match bump {
            VersionBump::Major => Version::new(self.major + 1, 0, 0),
            VersionBump::Minor => Version::new(self.major, self.minor + 1, 0),
            VersionBump::Patch => Version::new(self.major, self.minor, self.patch + 1),
        }
    }

    /// Release channel implied by the prerelease tag.
    pub fn channel(&self) -> ReleaseChannel {
        let Some(prerelease) = &self.prerelease else {
            return ReleaseChannel::Stable;
        };

        let tag = prerelease.to_lowercase();
        if tag.contains("alpha") {
            ReleaseChannel::Alpha
        } else if tag.contains("beta") {
            ReleaseChannel::Beta
        } else if tag.contains("nightly") {
            ReleaseChannel::Nightly
        } else {
            // rc and anything unrecognised
            ReleaseChannel::Beta
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(prerelease) = &self.prerelease {
            write!(f, "-{}", prerelease)?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Free-function form of [`Version::compare`].
pub fn compare_versions(a: &Version, b: &Version) -> Ordering {
    a.compare(b)
}

/// `true` when `target` is strictly newer than `current`.
pub fn is_newer_version(current: &Version, target: &Version) -> bool {
    current.is_older_than(target)
}
