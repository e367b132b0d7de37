//! Event Bus System
//!
//! Type-safe publish/subscribe buses used by the updater:
//! - Subscription lifecycle management (subscribe/unsubscribe, one-shot)
//! - Filtered subscriptions
//! - Delivery statistics

pub mod core;
pub mod download_bus;
pub mod update_bus;

pub use self::core::{EventBusContainer, EventBusStats, SubscriptionId};
pub use download_bus::{DownloadBusContainer, DownloadEvent};
pub use update_bus::{UpdateBusContainer, UpdateEvent};
