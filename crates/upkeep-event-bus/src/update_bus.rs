//! Update Check Event Bus
//!
//! Lifecycle notifications published by the update checker.

use upkeep_types::UpdateCheckResult;

use super::core::{EventBusContainer, EventBusStats, SubscriptionId};

/// Update checker lifecycle events
///
/// For one check invocation `Checking` is always published before the
/// terminal event (`UpdateAvailable`, `UpdateNotAvailable` or `UpdateError`).
#[derive(Clone, Debug)]
pub enum UpdateEvent {
    /// A check started
    Checking,
    /// A check finished and produced a result
    CheckComplete(UpdateCheckResult),
    UpdateAvailable(UpdateCheckResult),
    UpdateNotAvailable(UpdateCheckResult),
    /// A check failed; `message` is suitable for display
    UpdateError { message: String },
    /// The running version is deprecated or below the supported minimum
    UpdateRequired {
        is_supported: bool,
        is_deprecated: bool,
        reason: String,
    },
    /// The user clicked an update notification
    OpenUpdateSettings,
}

impl UpdateEvent {
    /// Stable event name, also used as the renderer channel name where one exists
    pub fn name(&self) -> &'static str {
        match self {
            Self::Checking => "checking-for-update",
            Self::CheckComplete(_) => "update-check-complete",
            Self::UpdateAvailable(_) => "update-available",
            Self::UpdateNotAvailable(_) => "update-not-available",
            Self::UpdateError { .. } => "update-error",
            Self::UpdateRequired { .. } => "update-required",
            Self::OpenUpdateSettings => "open-update-settings",
        }
    }

    /// `true` for the event that closes a check invocation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::UpdateAvailable(_) | Self::UpdateNotAvailable(_) | Self::UpdateError { .. }
        )
    }
}

/// Specialized container for update checker events
#[derive(Clone)]
pub struct UpdateBusContainer {
    inner: EventBusContainer<UpdateEvent>,
}

impl UpdateBusContainer {
    pub fn new() -> Self {
        Self {
            inner: EventBusContainer::new(),
        }
    }

    /// Subscribe to all update events
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe(move |event| {
            callback(event);
            true
        })
    }

    /// Subscribe to events with the given name only, e.g. `"update-available"`
    pub fn subscribe_named<F>(&self, name: &'static str, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe_with_filter(
            move |event| {
                callback(event);
                true
            },
            move |event| event.name() == name,
        )
    }

    /// Subscribe to a single update event (one-shot)
    pub fn subscribe_once<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnOnce(&UpdateEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe_once(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn publish(&self, event: UpdateEvent) {
        log::trace!("[UpdateBus] Publishing event: {}", event.name());
        self.inner.publish(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    pub fn stats(&self) -> EventBusStats {
        self.inner.stats()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl Default for UpdateBusContainer {
    fn default() -> Self {
        Self::new()
    }
}
