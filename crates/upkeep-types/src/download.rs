//! Download progress and outcome reporting.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Snapshot of an in-flight transfer. Emitted repeatedly, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    /// 0-100
    pub percent: f64,
    /// Bytes received so far
    pub transferred: u64,
    /// Expected size, 0 when unknown
    pub total: u64,
    pub speed_bytes_per_sec: f64,
    /// `None` while the total or the speed is unknown
    pub eta_seconds: Option<u64>,
}

impl DownloadProgress {
    pub fn new(transferred: u64, total: u64, speed_bytes_per_sec: f64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            ((transferred as f64 / total as f64) * 100.0).min(100.0)
        };

        let eta_seconds = if total > 0 && speed_bytes_per_sec > 0.0 {
            let remaining = total.saturating_sub(transferred) as f64;
            Some((remaining / speed_bytes_per_sec).ceil() as u64)
        } else {
            None
        };

        Self {
            percent,
            transferred,
            total,
            speed_bytes_per_sec,
            eta_seconds,
        }
    }

    pub fn transferred_human(&self) -> String {
        format_bytes(self.transferred)
    }

    pub fn total_human(&self) -> String {
        format_bytes(self.total)
    }
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Why a download did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadFailure {
    MissingUrl,
    AlreadyInProgress,
    Transfer,
    Io,
    ChecksumMismatch,
    Cancelled,
}

/// Terminal outcome of one download attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    /// Hex SHA-256 of the bytes written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// `Some(true)` only when the digest matched the published one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<DownloadFailure>,
}

impl DownloadResult {
    pub fn completed(file_path: PathBuf, checksum: String, verified: bool) -> Self {
        Self {
            success: true,
            file_path: Some(file_path),
            checksum: Some(checksum),
            verified: Some(verified),
            error: None,
            failure: None,
        }
    }

    pub fn failed(failure: DownloadFailure, error: impl Into<String>) -> Self {
        Self {
            success: false,
            file_path: None,
            checksum: None,
            verified: None,
            error: Some(error.into()),
            failure: Some(failure),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure == Some(DownloadFailure::Cancelled)
    }
}
