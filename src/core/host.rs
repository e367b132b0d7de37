//! Collaborators provided by the host application.
//!
//! The updater only talks to these traits; the desktop shell, the CLI and the
//! tests each supply their own implementations.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Invoked when the user clicks a notification
pub type ClickHandler = Box<dyn Fn() + Send + Sync>;

/// OS notification surface
pub trait Notifier: Send + Sync {
    fn show(&self, title: &str, body: &str, on_click: ClickHandler);
}

/// Message channel to the UI process
pub trait RendererChannel: Send + Sync {
    fn send(&self, channel: &str, payload: serde_json::Value);
}

/// One audited action
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: String,
    pub resource: String,
    pub user_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// An action performed by the updater itself on release artifacts
    pub fn system(action: impl Into<String>, success: bool, details: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            resource: "version".to_string(),
            user_id: "system".to_string(),
            success,
            details,
            timestamp: Utc::now(),
        }
    }
}

/// Audit trail sink
pub trait AuditLog: Send + Sync {
    fn log_action(&self, event: AuditEvent);
}

/// Writes audit events as JSON to the `audit` log target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditLog;

impl AuditLog for LogAuditLog {
    fn log_action(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => log::info!(target: "audit", "{}", line),
            Err(e) => log::error!(target: "audit", "Failed to serialize audit event {}: {}", event.action, e),
        }
    }
}

/// Sends renderer messages to the log only; used when no UI is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRenderer;

impl RendererChannel for LogRenderer {
    fn send(&self, channel: &str, payload: serde_json::Value) {
        log::debug!(target: "update-check", "Message for renderer: channel={} payload={}", channel, payload);
    }
}
