//! Version Manager - owns the running version, update settings and the last
//! check result, and decides whether the release feed offers something newer.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use upkeep_types::{UpdateCheckResult, UpdateManifest, Version, VersionInfo};

use super::clock::Clock;
use super::error::UpdateResult;
use super::feed::ReleaseFeed;
use super::settings::{SettingsStore, UpdateSettings, UpdateSettingsPatch};

/// Diagnostic snapshot of the manager state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub current_version: VersionInfo,
    pub settings: UpdateSettings,
    pub last_check_result: Option<UpdateCheckResult>,
    pub update_endpoint: String,
    pub platform: &'static str,
    pub arch: &'static str,
    pub package_version: &'static str,
}

pub struct VersionManager {
    current: VersionInfo,
    settings: RwLock<UpdateSettings>,
    store: SettingsStore,
    feed: Arc<dyn ReleaseFeed>,
    clock: Arc<dyn Clock>,
    last_result: Mutex<Option<UpdateCheckResult>>,
}

impl VersionManager {
    /// Create a manager for the running build.
    ///
    /// `current_version` is build metadata (normally `CARGO_PKG_VERSION`); a
    /// malformed value is a packaging defect and is returned as an error.
    pub fn new(
        current_version: &str,
        store: SettingsStore,
        feed: Arc<dyn ReleaseFeed>,
        clock: Arc<dyn Clock>,
    ) -> UpdateResult<Self> {
        let current = VersionInfo::new(Version::parse(current_version)?, clock.now());
        let settings = store.load();

        log::info!(
            target: "version",
            "VersionManager initialized: current_version={} channel={} auto_check={}",
            current.version_string,
            settings.channel,
            settings.auto_check
        );

        Ok(Self {
            current,
            settings: RwLock::new(settings),
            store,
            feed,
            clock,
            last_result: Mutex::new(None),
        })
    }

    pub fn get_current_version(&self) -> VersionInfo {
        self.current.clone()
    }

    pub fn get_update_settings(&self) -> UpdateSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge `patch` into the settings and persist them.
    ///
    /// A failed write is logged; the in-memory settings stay authoritative for
    /// the rest of the session.
    pub fn update_settings(&self, patch: &UpdateSettingsPatch) -> UpdateSettings {
        let (updated, channel_changed) = {
            let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
            let previous_channel = settings.channel;
            patch.apply(&mut settings);
            (settings.clone(), settings.channel != previous_channel)
        };

        if channel_changed {
            // cached result describes another channel
            self.last_result
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }

        self.persist(&updated);

        log::info!(
            target: "version",
            "Update settings changed: changes={} channel={} auto_check={} check_interval={}h",
            serde_json::to_string(patch).unwrap_or_default(),
            updated.channel,
            updated.auto_check,
            updated.check_interval
        );
        updated
    }

    fn persist(&self, settings: &UpdateSettings) {
        if let Err(e) = self.store.save(settings) {
            log::error!(target: "version", "Failed to save update settings: {}", e);
        }
    }

    /// Most recent successful check result, if any
    pub fn last_check_result(&self) -> Option<UpdateCheckResult> {
        self.last_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Compare the running version with the feed's latest release on the
    /// configured channel.
    ///
    /// Without `force`, a result younger than the check interval is returned
    /// unchanged. Feed failures never propagate: they produce a result with
    /// `has_update == false` and `error` set.
    pub async fn check_for_updates(&self, force: bool) -> UpdateCheckResult {
        let now = self.clock.now();
        let settings = self.get_update_settings();

        if !force {
            if let Some(cached) = self.last_check_result() {
                let since = now - cached.last_checked;
                if since < settings.check_interval() {
                    log::debug!(
                        target: "version",
                        "Skipping update check - too soon: minutes_since_check={} check_interval_minutes={}",
                        since.num_minutes(),
                        settings.check_interval().num_minutes()
                    );
                    return cached;
                }
            }
        }

        log::info!(
            target: "version",
            "Checking for updates: channel={} current_version={} force={}",
            settings.channel,
            self.current.version_string,
            force
        );

        let manifest = match self.fetch_manifest().await {
            Ok(manifest) => manifest,
            Err(message) => {
                return UpdateCheckResult::failed_open(self.current.clone(), now, message);
            }
        };

        let latest = manifest.latest_for(settings.channel).cloned();
        let result = UpdateCheckResult::evaluate(self.current.clone(), latest, now);

        *self.last_result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        self.record_check(now);

        log::info!(
            target: "version",
            "Update check completed: has_update={} latest_version={} is_downgrade={}",
            result.has_update,
            result
                .latest_version
                .as_ref()
                .map(|v| v.version_string.as_str())
                .unwrap_or("none"),
            result.is_downgrade
        );
        result
    }

    fn record_check(&self, at: DateTime<Utc>) {
        let updated = {
            let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
            settings.last_check = Some(at);
            settings.clone()
        };
        self.persist(&updated);
    }

    /// Fetch the manifest, logging failures. The error is the user-facing message.
    async fn fetch_manifest(&self) -> Result<UpdateManifest, String> {
        self.feed.fetch_manifest().await.map_err(|e| {
            log::warn!(
                target: "version",
                "Failed to fetch update manifest: endpoint={} error={}",
                self.feed.endpoint(),
                e
            );
            e.user_message()
        })
    }

    /// `true` if the manifest lists the running version as deprecated.
    /// Unreachable feeds count as "not deprecated".
    pub async fn is_current_version_deprecated(&self) -> bool {
        match self.fetch_manifest().await {
            Ok(manifest) => manifest.is_deprecated(&self.current.version_string),
            Err(_) => false,
        }
    }

    /// `true` if the running version is at or above the manifest minimum.
    /// Unreachable feeds and unparsable minimums count as "supported".
    pub async fn is_current_version_supported(&self) -> bool {
        let Ok(manifest) = self.fetch_manifest().await else {
            return true;
        };

        match Version::parse(&manifest.minimum_version) {
            Ok(minimum) => !self.current.version.is_older_than(&minimum),
            Err(e) => {
                log::warn!(target: "version", "Ignoring invalid minimum version: {}", e);
                true
            }
        }
    }

    pub fn endpoint(&self) -> String {
        self.feed.endpoint()
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            current_version: self.get_current_version(),
            settings: self.get_update_settings(),
            last_check_result: self.last_check_result(),
            update_endpoint: self.feed.endpoint(),
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            package_version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::updater::error::UpdateError;
    use crate::test_mock_data::{ManualClock, ScriptedFeed, manifest_with};
    use upkeep_types::ReleaseChannel;

    fn manager(
        dir: &std::path::Path,
        current: &str,
        feed: Arc<ScriptedFeed>,
        clock: Arc<ManualClock>,
    ) -> VersionManager {
        VersionManager::new(
            current,
            SettingsStore::new(dir.join("update-settings.json")),
            feed,
            clock,
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_current_version_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = VersionManager::new(
            "1.0",
            SettingsStore::new(temp_dir.path().join("s.json")),
            Arc::new(ScriptedFeed::new(manifest_with(&[]))),
            Arc::new(ManualClock::default()),
        );
        assert!(matches!(result, Err(UpdateError::InvalidVersion(_))));
    }

    #[tokio::test]
    async fn test_update_available() {
        let temp_dir = tempfile::tempdir().unwrap();
        let feed = Arc::new(ScriptedFeed::new(manifest_with(&[(ReleaseChannel::Stable, "1.1.0")])));
        let manager = manager(temp_dir.path(), "1.0.0", feed, Arc::new(ManualClock::default()));

        let result = manager.check_for_updates(false).await;
        assert!(result.has_update);
        assert!(!result.is_downgrade);
        assert!(result.error.is_none());
        assert_eq!(
            result.update_available.as_ref().unwrap().version_string,
            "1.1.0"
        );
        assert_eq!(result.current_version.version_string, "1.0.0");
    }

    #[tokio::test]
    async fn test_downgrade_detected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let feed = Arc::new(ScriptedFeed::new(manifest_with(&[(ReleaseChannel::Stable, "1.9.0")])));
        let manager = manager(temp_dir.path(), "2.0.0", feed, Arc::new(ManualClock::default()));

        let result = manager.check_for_updates(false).await;
        assert!(!result.has_update);
        assert!(result.is_downgrade);
        assert!(result.update_available.is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_within_interval() {
        let temp_dir = tempfile::tempdir().unwrap();
        let feed = Arc::new(ScriptedFeed::new(manifest_with(&[(ReleaseChannel::Stable, "1.1.0")])));
        let clock = Arc::new(ManualClock::default());
        let manager = manager(temp_dir.path(), "1.0.0", feed.clone(), clock.clone());

        let first = manager.check_for_updates(false).await;
        clock.advance(chrono::Duration::hours(23));
        let second = manager.check_for_updates(false).await;

        assert_eq!(feed.calls(), 1);
        assert_eq!(first, second);

        clock.advance(chrono::Duration::hours(2));
        let third = manager.check_for_updates(false).await;
        assert_eq!(feed.calls(), 2);
        assert!(third.last_checked > first.last_checked);
    }

    #[tokio::test]
    async fn test_force_bypasses_cache() {
        let temp_dir = tempfile::tempdir().unwrap();
        let feed = Arc::new(ScriptedFeed::new(manifest_with(&[(ReleaseChannel::Stable, "1.1.0")])));
        let manager = manager(
            temp_dir.path(),
            "1.0.0",
            feed.clone(),
            Arc::new(ManualClock::default()),
        );

        manager.check_for_updates(false).await;
        manager.check_for_updates(true).await;
        assert_eq!(feed.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let feed = Arc::new(ScriptedFeed::failing("connection refused"));
        let manager = manager(
            temp_dir.path(),
            "1.0.0",
            feed.clone(),
            Arc::new(ManualClock::default()),
        );

        let result = manager.check_for_updates(false).await;
        assert!(!result.has_update);
        assert!(result.latest_version.is_none());
        assert_eq!(
            result.error.as_deref(),
            Some("Unable to check for updates at this time")
        );
        // failures are not cached
        assert!(manager.last_check_result().is_none());
        manager.check_for_updates(false).await;
        assert_eq!(feed.calls(), 2);
        assert!(manager.get_update_settings().last_check.is_none());
    }

    #[tokio::test]
    async fn test_channel_selects_manifest_entry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let feed = Arc::new(ScriptedFeed::new(manifest_with(&[
            (ReleaseChannel::Stable, "1.0.0"),
            (ReleaseChannel::Beta, "1.1.0-beta.1"),
        ])));
        let manager = manager(
            temp_dir.path(),
            "1.0.0",
            feed.clone(),
            Arc::new(ManualClock::default()),
        );

        assert!(!manager.check_for_updates(false).await.has_update);

        manager.update_settings(&UpdateSettingsPatch {
            channel: Some(ReleaseChannel::Beta),
            ..Default::default()
        });
        // switching channel drops the cached stable result
        let beta = manager.check_for_updates(false).await;
        assert!(beta.has_update);
        assert_eq!(feed.calls(), 2);

        manager.update_settings(&UpdateSettingsPatch {
            channel: Some(ReleaseChannel::Nightly),
            ..Default::default()
        });
        let nightly = manager.check_for_updates(false).await;
        assert!(!nightly.has_update);
        assert!(nightly.latest_version.is_none());
    }

    #[tokio::test]
    async fn test_check_persists_last_check() {
        let temp_dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let feed = Arc::new(ScriptedFeed::new(manifest_with(&[(ReleaseChannel::Stable, "1.0.0")])));
        let manager = manager(temp_dir.path(), "1.0.0", feed, clock.clone());

        manager.check_for_updates(false).await;

        let stored = SettingsStore::new(temp_dir.path().join("update-settings.json")).load();
        assert_eq!(stored.last_check, Some(clock.now()));
    }

    #[test]
    fn test_update_settings_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = manager(
            temp_dir.path(),
            "1.0.0",
            Arc::new(ScriptedFeed::new(manifest_with(&[]))),
            Arc::new(ManualClock::default()),
        );

        let updated = manager.update_settings(&UpdateSettingsPatch {
            auto_check: Some(false),
            check_interval: Some(6),
            ..Default::default()
        });
        assert!(!updated.auto_check);
        assert_eq!(manager.get_update_settings(), updated);

        let stored = SettingsStore::new(temp_dir.path().join("update-settings.json")).load();
        assert!(!stored.auto_check);
        assert_eq!(stored.check_interval, 6);
    }

    #[test]
    fn test_update_settings_survives_write_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let manager = VersionManager::new(
            "1.0.0",
            SettingsStore::new(blocker.join("update-settings.json")),
            Arc::new(ScriptedFeed::new(manifest_with(&[]))),
            Arc::new(ManualClock::default()),
        )
        .unwrap();

        manager.update_settings(&UpdateSettingsPatch {
            notify_on_update: Some(false),
            ..Default::default()
        });
        assert!(!manager.get_update_settings().notify_on_update);
    }

    #[test]
    fn test_current_version_is_a_copy() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = manager(
            temp_dir.path(),
            "3.1.0-beta.2",
            Arc::new(ScriptedFeed::new(manifest_with(&[]))),
            Arc::new(ManualClock::default()),
        );

        let mut copy = manager.get_current_version();
        copy.version_string = "tampered".into();
        let current = manager.get_current_version();
        assert_eq!(current.version_string, "3.1.0-beta.2");
        assert_eq!(current.channel, ReleaseChannel::Beta);
    }

    #[tokio::test]
    async fn test_deprecated_and_supported() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut manifest = manifest_with(&[(ReleaseChannel::Stable, "2.0.0")]);
        manifest.minimum_version = "1.5.0".into();
        manifest.deprecated_versions = vec!["1.6.0".into()];
        let feed = Arc::new(ScriptedFeed::new(manifest));
        let clock = Arc::new(ManualClock::default());

        let old = manager(temp_dir.path(), "1.4.9", feed.clone(), clock.clone());
        assert!(!old.is_current_version_supported().await);
        assert!(!old.is_current_version_deprecated().await);

        let deprecated = manager(temp_dir.path(), "1.6.0", feed.clone(), clock.clone());
        assert!(deprecated.is_current_version_supported().await);
        assert!(deprecated.is_current_version_deprecated().await);

        let exact = manager(temp_dir.path(), "1.5.0", feed, clock);
        assert!(exact.is_current_version_supported().await);
    }

    #[tokio::test]
    async fn test_support_checks_fail_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = manager(
            temp_dir.path(),
            "0.1.0",
            Arc::new(ScriptedFeed::failing("timeout")),
            Arc::new(ManualClock::default()),
        );

        assert!(manager.is_current_version_supported().await);
        assert!(!manager.is_current_version_deprecated().await);
    }

    #[tokio::test]
    async fn test_system_info() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = manager(
            temp_dir.path(),
            "1.0.0",
            Arc::new(ScriptedFeed::new(manifest_with(&[(ReleaseChannel::Stable, "1.1.0")]))),
            Arc::new(ManualClock::default()),
        );
        manager.check_for_updates(false).await;

        let info = manager.system_info();
        assert_eq!(info.current_version.version_string, "1.0.0");
        assert!(info.last_check_result.unwrap().has_update);
        assert_eq!(info.update_endpoint, "mock://feed");
        assert!(!info.platform.is_empty());
    }
}
