//! Download Event Bus
//!
//! Progress and outcome notifications published by the update downloader.

use upkeep_types::{DownloadProgress, DownloadResult};
use uuid::Uuid;

use super::core::{EventBusContainer, EventBusStats, SubscriptionId};

/// Download lifecycle events, tagged with the transfer session they belong to
#[derive(Clone, Debug)]
pub enum DownloadEvent {
    Started { session_id: Uuid, version: String },
    Progress {
        session_id: Uuid,
        progress: DownloadProgress,
    },
    Completed {
        session_id: Uuid,
        result: DownloadResult,
    },
    Failed { session_id: Uuid, error: String },
    Cancelled { session_id: Uuid },
}

impl DownloadEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::Started { session_id, .. }
            | Self::Progress { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Failed { session_id, .. }
            | Self::Cancelled { session_id } => *session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Specialized container for download events
#[derive(Clone)]
pub struct DownloadBusContainer {
    inner: EventBusContainer<DownloadEvent>,
}

impl DownloadBusContainer {
    pub fn new() -> Self {
        Self {
            inner: EventBusContainer::new(),
        }
    }

    /// Subscribe to all download events
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DownloadEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe(move |event| {
            callback(event);
            true
        })
    }

    /// Subscribe to progress snapshots only
    pub fn subscribe_progress<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Uuid, &DownloadProgress) + Send + Sync + 'static,
    {
        self.inner.subscribe(move |event| {
            if let DownloadEvent::Progress {
                session_id,
                progress,
            } = event
            {
                callback(*session_id, progress);
            }
            true
        })
    }

    /// Subscribe to events for one transfer session
    pub fn subscribe_session<F>(&self, session_id: Uuid, callback: F) -> SubscriptionId
    where
        F: Fn(&DownloadEvent) + Send + Sync + 'static,
    {
        self.inner.subscribe_with_filter(
            move |event| {
                callback(event);
                true
            },
            move |event| event.session_id() == session_id,
        )
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn publish(&self, event: DownloadEvent) {
        log::trace!(
            "[DownloadBus] Publishing {} for session: {}",
            event.name(),
            event.session_id()
        );
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

impl Default for DownloadBusContainer {
    fn default() -> Self {
        Self::new()
    }
}
