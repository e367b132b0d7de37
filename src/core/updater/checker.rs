//! Update Checker - runs checks on a schedule or on demand and reports the
//! outcome to the event bus, the renderer and the OS notifier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use upkeep_event_bus::{UpdateBusContainer, UpdateEvent};
use upkeep_types::UpdateCheckResult;

use super::error::{UpdateError, UpdateResult};
use super::manager::VersionManager;
use super::settings::{UpdateSettings, UpdateSettingsPatch};
use crate::core::host::{Notifier, RendererChannel};

/// Warm-up before the first scheduled check
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(30);

/// Result of [`UpdateChecker::check_version_support`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSupport {
    pub is_supported: bool,
    pub is_deprecated: bool,
    pub should_force_update: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerStatus {
    pub is_checking: bool,
    pub is_scheduled: bool,
    pub settings: UpdateSettings,
    pub last_check_result: Option<UpdateCheckResult>,
}

#[derive(Default)]
struct Schedule {
    /// Set by `start`, cleared by `stop`
    running: bool,
    /// Pending scheduled check
    pending: Option<CancellationToken>,
}

/// Clears the in-flight flag when a check ends, including when the check
/// future is dropped.
struct CheckingGuard<'a>(&'a AtomicBool);

impl Drop for CheckingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct UpdateChecker {
    me: Weak<UpdateChecker>,
    manager: Arc<VersionManager>,
    bus: UpdateBusContainer,
    renderer: Option<Arc<dyn RendererChannel>>,
    notifier: Option<Arc<dyn Notifier>>,
    app_name: String,
    startup_delay: Duration,
    checking: AtomicBool,
    schedule: Mutex<Schedule>,
}

pub struct UpdateCheckerBuilder {
    manager: Arc<VersionManager>,
    renderer: Option<Arc<dyn RendererChannel>>,
    notifier: Option<Arc<dyn Notifier>>,
    app_name: String,
    startup_delay: Duration,
}

impl UpdateCheckerBuilder {
    pub fn renderer(mut self, renderer: Arc<dyn RendererChannel>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Product name shown in notifications
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn build(self) -> Arc<UpdateChecker> {
        log::info!(target: "update-check", "UpdateChecker initialized");
        Arc::new_cyclic(|me| UpdateChecker {
            me: me.clone(),
            manager: self.manager,
            bus: UpdateBusContainer::new(),
            renderer: self.renderer,
            notifier: self.notifier,
            app_name: self.app_name,
            startup_delay: self.startup_delay,
            checking: AtomicBool::new(false),
            schedule: Mutex::new(Schedule::default()),
        })
    }
}

impl UpdateChecker {
    pub fn builder(manager: Arc<VersionManager>) -> UpdateCheckerBuilder {
        UpdateCheckerBuilder {
            manager,
            renderer: None,
            notifier: None,
            app_name: "Upkeep".to_string(),
            startup_delay: DEFAULT_STARTUP_DELAY,
        }
    }

    pub fn bus(&self) -> &UpdateBusContainer {
        &self.bus
    }

    pub fn manager(&self) -> &Arc<VersionManager> {
        &self.manager
    }

    fn schedule(&self) -> std::sync::MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================================================
    // Scheduling
    // ============================================================================

    /// Begin automatic checking. The first check runs after the startup delay;
    /// later ones follow the configured interval. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) {
        self.schedule().running = true;

        let settings = self.manager.get_update_settings();
        if !settings.auto_check {
            log::info!(target: "update-check", "Auto update check disabled");
            return;
        }

        self.arm(self.startup_delay);
        log::info!(
            target: "update-check",
            "UpdateChecker started: auto_check={} check_interval={}h",
            settings.auto_check,
            settings.check_interval
        );
    }

    /// Cancel the pending scheduled check. Safe to call repeatedly.
    pub fn stop(&self) {
        let pending = {
            let mut schedule = self.schedule();
            schedule.running = false;
            schedule.pending.take()
        };
        if let Some(token) = pending {
            token.cancel();
        }
        log::info!(target: "update-check", "UpdateChecker stopped");
    }

    pub fn is_scheduled(&self) -> bool {
        self.schedule().pending.is_some()
    }

    fn arm(&self, delay: Duration) {
        let token = CancellationToken::new();
        if let Some(previous) = self.schedule().pending.replace(token.clone()) {
            previous.cancel();
        }

        let me = self.me.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(checker) = me.upgrade() else {
                return;
            };
            if let Err(e) = checker.check_for_updates(false).await {
                log::debug!(target: "update-check", "Scheduled update check skipped: {}", e);
            }
        });

        log::debug!(
            target: "update-check",
            "Next update check scheduled: delay_secs={}",
            delay.as_secs()
        );
    }

    fn disarm(&self) {
        if let Some(token) = self.schedule().pending.take() {
            token.cancel();
        }
    }

    /// Re-arm from the current settings after a check or a settings change.
    fn reschedule(&self) {
        let settings = self.manager.get_update_settings();
        let running = self.schedule().running;

        if running && settings.auto_check {
            self.arm(settings.check_interval_std());
        } else {
            self.disarm();
        }
    }

    // ============================================================================
    // Checks
    // ============================================================================

    /// Run one check.
    ///
    /// Fails with [`UpdateError::CheckInProgress`] while another check is in
    /// flight, whether or not `force` is set. Feed failures are not errors here:
    /// they come back as a result with `error` set and an `update-error` event.
    pub async fn check_for_updates(&self, force: bool) -> UpdateResult<UpdateCheckResult> {
        if self
            .checking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!(target: "update-check", "Update check already in progress");
            return Err(UpdateError::CheckInProgress);
        }
        let guard = CheckingGuard(&self.checking);

        self.bus.publish(UpdateEvent::Checking);
        self.send_to_renderer("update-checking", serde_json::Value::Null);
        log::info!(target: "update-check", "Starting update check: force={}", force);

        let result = self.manager.check_for_updates(force).await;

        match &result.error {
            Some(message) => {
                log::error!(target: "update-check", "Update check failed: error={}", message);
                self.bus.publish(UpdateEvent::UpdateError {
                    message: message.clone(),
                });
                // background failures stay silent in the UI
                if force {
                    self.send_to_renderer("update-error", json!({ "message": message }));
                }
            }
            None => {
                self.bus.publish(UpdateEvent::CheckComplete(result.clone()));

                if result.has_update && result.update_available.is_some() {
                    self.bus.publish(UpdateEvent::UpdateAvailable(result.clone()));
                    self.handle_update_available(&result);
                } else {
                    log::debug!(
                        target: "update-check",
                        "No update available: current_version={} latest_version={}",
                        result.current_version.version_string,
                        result
                            .latest_version
                            .as_ref()
                            .map(|v| v.version_string.as_str())
                            .unwrap_or("none")
                    );
                    self.bus.publish(UpdateEvent::UpdateNotAvailable(result.clone()));
                    self.send_to_renderer("update-not-available", to_payload(&result));
                }
            }
        }

        drop(guard);
        self.reschedule();
        Ok(result)
    }

    pub async fn force_check(&self) -> UpdateResult<UpdateCheckResult> {
        log::info!(target: "update-check", "Forcing update check");
        self.check_for_updates(true).await
    }

    pub fn is_checking(&self) -> bool {
        self.checking.load(Ordering::Acquire)
    }

    fn handle_update_available(&self, result: &UpdateCheckResult) {
        let Some(update) = result.update_available.as_ref() else {
            return;
        };
        let settings = self.manager.get_update_settings();

        log::info!(
            target: "update-check",
            "Update available: current_version={} new_version={} channel={}",
            result.current_version.version_string,
            update.version_string,
            update.channel
        );

        self.send_to_renderer("update-available", to_payload(result));

        if settings.notify_on_update {
            self.show_update_notification(&update.version_string, update.changelog.as_deref());
        }
    }

    fn show_update_notification(&self, version: &str, changelog: Option<&str>) {
        let Some(notifier) = self.notifier.as_ref() else {
            log::debug!(target: "update-check", "No notifier attached, skipping notification");
            return;
        };

        let title = format!("{} - Update Available", self.app_name);
        let body = format!(
            "Version {} is available for download.\n{}",
            version,
            changelog.unwrap_or("See what's new!")
        );

        let bus = self.bus.clone();
        let renderer = self.renderer.clone();
        notifier.show(
            &title,
            &body,
            Box::new(move || {
                bus.publish(UpdateEvent::OpenUpdateSettings);
                if let Some(renderer) = renderer.as_ref() {
                    renderer.send("open-update-settings", serde_json::Value::Null);
                }
            }),
        );
        log::debug!(target: "update-check", "Update notification shown: version={}", version);
    }

    fn send_to_renderer(&self, channel: &str, payload: serde_json::Value) {
        if let Some(renderer) = self.renderer.as_ref() {
            renderer.send(channel, payload);
            log::debug!(target: "update-check", "Message sent to renderer: channel={}", channel);
        }
    }

    /// Ask the feed whether the running version must be replaced.
    ///
    /// Unreachable feeds count as "supported, not deprecated".
    pub async fn check_version_support(&self) -> VersionSupport {
        let (is_supported, is_deprecated) = tokio::join!(
            self.manager.is_current_version_supported(),
            self.manager.is_current_version_deprecated()
        );
        let should_force_update = !is_supported || is_deprecated;

        if should_force_update {
            let reason = if is_deprecated {
                format!(
                    "This version has been discontinued. Update to keep using {}.",
                    self.app_name
                )
            } else {
                "This version is no longer supported. Update to the latest version.".to_string()
            };

            log::warn!(
                target: "update-check",
                "Current version requires update: is_supported={} is_deprecated={} current_version={}",
                is_supported,
                is_deprecated,
                self.manager.get_current_version().version_string
            );

            self.send_to_renderer(
                "update-required",
                json!({
                    "isSupported": is_supported,
                    "isDeprecated": is_deprecated,
                    "message": reason,
                }),
            );
            self.bus.publish(UpdateEvent::UpdateRequired {
                is_supported,
                is_deprecated,
                reason,
            });
        }

        VersionSupport {
            is_supported,
            is_deprecated,
            should_force_update,
        }
    }

    /// Update the settings and re-arm the schedule from them, without the
    /// startup delay.
    pub fn update_settings(&self, patch: &UpdateSettingsPatch) -> UpdateSettings {
        let updated = self.manager.update_settings(patch);
        self.reschedule();

        log::info!(
            target: "update-check",
            "UpdateChecker settings updated: auto_check={} scheduled={}",
            updated.auto_check,
            self.is_scheduled()
        );
        updated
    }

    pub fn status(&self) -> CheckerStatus {
        CheckerStatus {
            is_checking: self.is_checking(),
            is_scheduled: self.is_scheduled(),
            settings: self.manager.get_update_settings(),
            last_check_result: self.manager.last_check_result(),
        }
    }
}

fn to_payload(result: &UpdateCheckResult) -> serde_json::Value {
    serde_json::to_value(result).unwrap_or_default()
}
