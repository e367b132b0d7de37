//! Generic subscriber bus shared by the specialised update and download buses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Handle returned by `subscribe*`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct Subscription<T> {
    id: SubscriptionId,
    callback: Callback<T>,
    filter: Option<Filter<T>>,
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventBusStats {
    pub events_published: u64,
    pub events_delivered: u64,
    pub active_subscriptions: usize,
}

struct BusState<T> {
    subscriptions: Vec<Arc<Subscription<T>>>,
    events_published: u64,
    events_delivered: u64,
}

/// Thread-safe, cloneable event bus.
///
/// Callbacks run on the publishing thread, outside the internal lock, so a
/// callback may publish or subscribe on the same bus.
pub struct EventBusContainer<T> {
    state: Arc<Mutex<BusState<T>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for EventBusContainer<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<T: 'static> EventBusContainer<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                subscriptions: Vec::new(),
                events_published: 0,
                events_delivered: 0,
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn add(&self, callback: Callback<T>, filter: Option<Filter<T>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().subscriptions.push(Arc::new(Subscription {
            id,
            callback,
            filter,
        }));
        id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to every event.
    ///
    /// The callback returns `true` to stay subscribed, `false` to be removed.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.add(Box::new(callback), None)
    }

    /// Subscribe to events accepted by `filter`
    pub fn subscribe_with_filter<F, P>(&self, callback: F, filter: P) -> SubscriptionId
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.add(Box::new(callback), Some(Box::new(filter)))
    }

    /// Receive exactly one event, then unsubscribe
    pub fn subscribe_once<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnOnce(&T) + Send + Sync + 'static,
    {
        let slot = Mutex::new(Some(callback));
        self.add(
            Box::new(move |event| {
                if let Some(callback) = slot.lock().unwrap_or_else(PoisonError::into_inner).take()
                {
                    callback(event);
                }
                false
            }),
            None,
        )
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id != id);
        state.subscriptions.len() != before
    }

    /// Deliver `event` to every matching subscriber in subscription order.
    pub fn publish(&self, event: T) {
        let snapshot: Vec<Arc<Subscription<T>>> = {
            let mut state = self.lock();
            state.events_published += 1;
            state.subscriptions.clone()
        };

        let mut finished = Vec::new();
        let mut delivered = 0;
        for subscription in &snapshot {
            if let Some(filter) = &subscription.filter {
                if !filter(&event) {
                    continue;
                }
            }
            delivered += 1;
            if !(subscription.callback)(&event) {
                finished.push(subscription.id);
            }
        }

        let mut state = self.lock();
        state.events_delivered += delivered;
        if !finished.is_empty() {
            state.subscriptions.retain(|s| !finished.contains(&s.id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    pub fn stats(&self) -> EventBusStats {
        let state = self.lock();
        EventBusStats {
            events_published: state.events_published,
            events_delivered: state.events_delivered,
            active_subscriptions: state.subscriptions.len(),
        }
    }

    pub fn clear(&self) {
        self.lock().subscriptions.clear();
    }
}

impl<T: 'static> Default for EventBusContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}
