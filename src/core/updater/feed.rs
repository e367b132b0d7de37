//! Release feeds: where the update manifest comes from.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use upkeep_types::{ReleaseChannel, UpdateManifest, Version, VersionInfo};

use super::error::{UpdateError, UpdateResult};

/// Source of the remote update manifest.
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    async fn fetch_manifest(&self) -> UpdateResult<UpdateManifest>;

    /// Human-readable location, used in logs
    fn endpoint(&self) -> String;
}

/// Upper bound on a whole manifest request, headers and body included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Support policy attached to feeds that do not publish one themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestPolicy {
    pub minimum_version: String,
    pub deprecated_versions: Vec<String>,
}

impl Default for ManifestPolicy {
    fn default() -> Self {
        Self {
            minimum_version: "0.0.0".to_string(),
            deprecated_versions: Vec::new(),
        }
    }
}

/// Installer file extensions for the running platform.
pub fn installer_extensions() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        &[".exe", ".msi"]
    } else if cfg!(target_os = "macos") {
        &[".dmg", ".pkg"]
    } else if cfg!(target_os = "linux") {
        &[".appimage", ".deb", ".rpm"]
    } else {
        ALL_INSTALLER_EXTENSIONS
    }
}

const ALL_INSTALLER_EXTENSIONS: &[&str] = &[".exe", ".msi", ".dmg", ".pkg", ".appimage", ".deb", ".rpm"];

/// GitHub release API response structure
#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: u64,
}

fn select_installer<'a>(assets: &'a [GitHubAsset], extensions: &[&str]) -> Option<&'a GitHubAsset> {
    let matches = |asset: &&GitHubAsset, exts: &[&str]| {
        let name = asset.name.to_lowercase();
        exts.iter().any(|ext| name.ends_with(ext))
    };

    assets
        .iter()
        .find(|a| matches(a, extensions))
        .or_else(|| assets.iter().find(|a| matches(a, ALL_INSTALLER_EXTENSIONS)))
}

fn manifest_from_github(
    release: GitHubRelease,
    policy: &ManifestPolicy,
    extensions: &[&str],
) -> UpdateResult<UpdateManifest> {
    let version_string = release
        .tag_name
        .strip_prefix('v')
        .unwrap_or(&release.tag_name);
    let version = Version::parse(version_string).map_err(|e| UpdateError::InvalidManifest {
        message: format!("release tag {:?}: {}", release.tag_name, e),
    })?;

    let mut info = VersionInfo::new(version, release.published_at.unwrap_or_else(Utc::now))
        .with_channel(ReleaseChannel::Stable);
    info.changelog = release.body.filter(|body| !body.trim().is_empty());

    let installer = select_installer(&release.assets, extensions);
    info.download_url = installer.map(|a| a.browser_download_url.clone());
    info.size = installer
        .or_else(|| release.assets.first())
        .map(|a| a.size);

    let mut latest_versions = BTreeMap::new();
    latest_versions.insert(ReleaseChannel::Stable, info);

    Ok(UpdateManifest {
        latest_versions,
        minimum_version: policy.minimum_version.clone(),
        deprecated_versions: policy.deprecated_versions.clone(),
        release_notes: Vec::new(),
    })
}

async fn get_text(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
    timeout: Duration,
) -> UpdateResult<String> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, accept)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| UpdateError::Fetch {
            endpoint: url.to_string(),
            message: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(UpdateError::ServerError {
            endpoint: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    response.text().await.map_err(|e| UpdateError::Fetch {
        endpoint: url.to_string(),
        message: e.to_string(),
    })
}

/// Reads `<base>/releases/latest` from a GitHub-style releases API and maps it
/// onto the stable channel.
#[derive(Clone)]
pub struct GitHubReleaseFeed {
    client: reqwest::Client,
    base_url: String,
    policy: ManifestPolicy,
    timeout: Duration,
}

impl GitHubReleaseFeed {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            policy: ManifestPolicy::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: ManifestPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ReleaseFeed for GitHubReleaseFeed {
    async fn fetch_manifest(&self) -> UpdateResult<UpdateManifest> {
        let url = self.endpoint();
        let body = get_text(&self.client, &url, "application/vnd.github+json", self.timeout).await?;
        let release: GitHubRelease =
            serde_json::from_str(&body).map_err(|e| UpdateError::InvalidManifest {
                message: e.to_string(),
            })?;
        manifest_from_github(release, &self.policy, installer_extensions())
    }

    fn endpoint(&self) -> String {
        format!("{}/releases/latest", self.base_url.trim_end_matches('/'))
    }
}

/// Reads a native manifest document from `<base>/manifest.json`.
#[derive(Clone)]
pub struct ManifestFeed {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ManifestFeed {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ReleaseFeed for ManifestFeed {
    async fn fetch_manifest(&self) -> UpdateResult<UpdateManifest> {
        let url = self.endpoint();
        let body = get_text(&self.client, &url, "application/json", self.timeout).await?;
        let manifest: UpdateManifest =
            serde_json::from_str(&body).map_err(|e| UpdateError::InvalidManifest {
                message: e.to_string(),
            })?;

        Version::parse(&manifest.minimum_version).map_err(|e| UpdateError::InvalidManifest {
            message: format!("minimumVersion: {}", e),
        })?;
        for (channel, info) in &manifest.latest_versions {
            if Version::parse(&info.version_string).ok().as_ref() != Some(&info.version) {
                return Err(UpdateError::InvalidManifest {
                    message: format!(
                        "{} entry: versionString {:?} does not match version {}",
                        channel, info.version_string, info.version
                    ),
                });
            }
        }
        Ok(manifest)
    }

    fn endpoint(&self) -> String {
        format!("{}/manifest.json", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::updater::transport::build_http_client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn release_json() -> serde_json::Value {
        serde_json::json!({
            "tag_name": "v1.2.0",
            "name": "Upkeep 1.2.0",
            "published_at": "2024-06-01T10:00:00Z",
            "body": "- faster startup",
            "assets": [
                {"name": "checksums.txt", "browser_download_url": "https://dl.example.com/checksums.txt", "size": 120},
                {"name": "upkeep-1.2.0.AppImage", "browser_download_url": "https://dl.example.com/upkeep-1.2.0.AppImage", "size": 4000},
                {"name": "upkeep-1.2.0.exe", "browser_download_url": "https://dl.example.com/upkeep-1.2.0.exe", "size": 3000},
                {"name": "upkeep-1.2.0.dmg", "browser_download_url": "https://dl.example.com/upkeep-1.2.0.dmg", "size": 5000}
            ]
        })
    }

    fn client() -> reqwest::Client {
        build_http_client(Duration::from_secs(5), None).unwrap()
    }

    #[test]
    fn test_github_mapping() {
        let release: GitHubRelease = serde_json::from_value(release_json()).unwrap();
        let manifest =
            manifest_from_github(release, &ManifestPolicy::default(), &[".exe", ".msi"]).unwrap();

        let stable = manifest.latest_for(ReleaseChannel::Stable).unwrap();
        assert_eq!(stable.version_string, "1.2.0");
        assert_eq!(stable.channel, ReleaseChannel::Stable);
        assert_eq!(stable.changelog.as_deref(), Some("- faster startup"));
        assert_eq!(
            stable.download_url.as_deref(),
            Some("https://dl.example.com/upkeep-1.2.0.exe")
        );
        assert_eq!(stable.size, Some(3000));
        assert_eq!(manifest.minimum_version, "0.0.0");
        assert!(manifest.deprecated_versions.is_empty());
    }

    #[test]
    fn test_github_mapping_appimage_case_insensitive() {
        let release: GitHubRelease = serde_json::from_value(release_json()).unwrap();
        let manifest = manifest_from_github(release, &ManifestPolicy::default(), &[".appimage"])
            .unwrap();
        let stable = manifest.latest_for(ReleaseChannel::Stable).unwrap();
        assert!(stable.download_url.as_deref().unwrap().ends_with(".AppImage"));
    }

    #[test]
    fn test_github_mapping_without_installer() {
        let release: GitHubRelease = serde_json::from_value(serde_json::json!({
            "tag_name": "2.0.0-beta.1",
            "assets": [{"name": "notes.txt", "browser_download_url": "https://x/notes.txt", "size": 7}]
        }))
        .unwrap();
        let policy = ManifestPolicy {
            minimum_version: "1.5.0".into(),
            deprecated_versions: vec!["1.6.0".into()],
        };
        let manifest = manifest_from_github(release, &policy, &[".exe"]).unwrap();
        let stable = manifest.latest_for(ReleaseChannel::Stable).unwrap();

        assert_eq!(stable.version_string, "2.0.0-beta.1");
        assert!(stable.download_url.is_none());
        assert!(stable.changelog.is_none());
        assert_eq!(stable.size, Some(7));
        assert_eq!(manifest.minimum_version, "1.5.0");
        assert!(manifest.is_deprecated("1.6.0"));
    }

    #[test]
    fn test_github_mapping_bad_tag() {
        let release: GitHubRelease =
            serde_json::from_value(serde_json::json!({"tag_name": "latest"})).unwrap();
        let err = manifest_from_github(release, &ManifestPolicy::default(), &[".exe"]).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidManifest { .. }));
    }

    #[tokio::test]
    async fn test_github_feed_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/upkeep/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_json()))
            .mount(&server)
            .await;

        let feed = GitHubReleaseFeed::new(client(), format!("{}/repos/acme/upkeep/", server.uri()));
        assert!(feed.endpoint().ends_with("/repos/acme/upkeep/releases/latest"));

        let manifest = feed.fetch_manifest().await.unwrap();
        let stable = manifest.latest_for(ReleaseChannel::Stable).unwrap();
        assert_eq!(stable.version, Version::new(1, 2, 0));
        assert!(stable.download_url.is_some());
    }

    #[tokio::test]
    async fn test_github_feed_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let feed = GitHubReleaseFeed::new(client(), server.uri());
        let err = feed.fetch_manifest().await.unwrap_err();
        assert!(matches!(err, UpdateError::ServerError { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_github_feed_invalid_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
            .mount(&server)
            .await;

        let feed = GitHubReleaseFeed::new(client(), server.uri());
        let err = feed.fetch_manifest().await.unwrap_err();
        assert!(matches!(err, UpdateError::InvalidManifest { .. }));
    }

    #[tokio::test]
    async fn test_manifest_feed_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "latestVersions": {
                    "stable": {
                        "version": {"major": 1, "minor": 3, "patch": 0},
                        "versionString": "1.3.0",
                        "releaseDate": "2024-07-01T00:00:00Z",
                        "channel": "stable"
                    },
                    "beta": {
                        "version": {"major": 1, "minor": 4, "patch": 0, "prerelease": "beta.2"},
                        "versionString": "1.4.0-beta.2",
                        "releaseDate": "2024-07-10T00:00:00Z",
                        "channel": "beta",
                        "checksums": {"sha256": "ff00", "md5": ""}
                    }
                },
                "minimumVersion": "1.0.0",
                "deprecatedVersions": ["1.0.1"]
            })))
            .mount(&server)
            .await;

        let feed = ManifestFeed::new(client(), server.uri());
        let manifest = feed.fetch_manifest().await.unwrap();

        assert_eq!(manifest.latest_versions.len(), 2);
        let beta = manifest.latest_for(ReleaseChannel::Beta).unwrap();
        assert_eq!(beta.expected_sha256(), Some("ff00"));
        assert!(manifest.is_deprecated("1.0.1"));
    }

    #[tokio::test]
    async fn test_manifest_feed_rejects_mismatched_version_string() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "latestVersions": {
                    "stable": {
                        "version": {"major": 1, "minor": 1, "patch": 0},
                        "versionString": "1.1.0/../../x",
                        "releaseDate": "2024-07-01T00:00:00Z",
                        "channel": "stable"
                    }
                },
                "minimumVersion": "1.0.0",
                "deprecatedVersions": []
            })))
            .mount(&server)
            .await;

        let err = ManifestFeed::new(client(), server.uri())
            .fetch_manifest()
            .await
            .unwrap_err();
        match err {
            UpdateError::InvalidManifest { message } => assert!(message.contains("1.1.0/../../x")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_stalled_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(release_json())
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let github = GitHubReleaseFeed::new(client(), server.uri())
            .with_timeout(Duration::from_millis(200));
        let err = github.fetch_manifest().await.unwrap_err();
        assert!(matches!(err, UpdateError::Fetch { .. }), "{}", err);

        let manifest = ManifestFeed::new(client(), server.uri())
            .with_timeout(Duration::from_millis(200));
        let err = manifest.fetch_manifest().await.unwrap_err();
        assert!(matches!(err, UpdateError::Fetch { .. }), "{}", err);

        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_manifest_feed_unreachable() {
        // nothing listens on port 9 (discard) on loopback in test environments
        let feed = ManifestFeed::new(client(), "http://127.0.0.1:9");
        let err = feed.fetch_manifest().await.unwrap_err();
        assert!(err.is_fetch_error());
    }
}
