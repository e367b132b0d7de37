use std::path::PathBuf;

use thiserror::Error;
use upkeep_types::VersionParseError;

/// Result type for update operations.
pub type UpdateResult<T> = std::result::Result<T, UpdateError>;

/// Errors that can occur during update operations.
#[derive(Debug, Error)]
pub enum UpdateError {
    // Version errors
    #[error(transparent)]
    InvalidVersion(#[from] VersionParseError),

    // Manifest errors
    #[error("Failed to reach update server {endpoint}: {message}")]
    Fetch { endpoint: String, message: String },

    #[error("Update server {endpoint} returned HTTP {status}")]
    ServerError { endpoint: String, status: u16 },

    #[error("Invalid update manifest: {message}")]
    InvalidManifest { message: String },

    // Concurrency errors
    #[error("Update check already in progress")]
    CheckInProgress,

    #[error("Download already in progress")]
    DownloadInProgress,

    // Download errors
    #[error("No download URL provided")]
    MissingDownloadUrl,

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Download cancelled")]
    Cancelled,

    // Settings errors
    #[error("Failed to persist settings to {path}: {message}")]
    Settings { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpdateError {
    /// Overlapping check or download
    pub fn is_concurrency_error(&self) -> bool {
        matches!(self, Self::CheckInProgress | Self::DownloadInProgress)
    }

    /// Manifest could not be obtained or understood
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::ServerError { .. } | Self::InvalidManifest { .. }
        )
    }

    /// Message shown to users; never includes transport internals.
    pub fn user_message(&self) -> String {
        if self.is_fetch_error() {
            "Unable to check for updates at this time".to_string()
        } else {
            self.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(UpdateError::CheckInProgress.is_concurrency_error());
        assert!(UpdateError::DownloadInProgress.is_concurrency_error());
        assert!(!UpdateError::Cancelled.is_concurrency_error());

        let fetch = UpdateError::Fetch {
            endpoint: "https://example.com".into(),
            message: "dns error: no such host".into(),
        };
        assert!(fetch.is_fetch_error());
        assert_eq!(fetch.user_message(), "Unable to check for updates at this time");
        assert!(fetch.to_string().contains("dns error"));
    }

    #[test]
    fn test_missing_url_message() {
        assert_eq!(
            UpdateError::MissingDownloadUrl.to_string(),
            "No download URL provided"
        );
        assert_eq!(
            UpdateError::MissingDownloadUrl.user_message(),
            "No download URL provided"
        );
    }

    #[test]
    fn test_parse_error_converts() {
        let err: UpdateError = upkeep_types::Version::parse("x").unwrap_err().into();
        assert_eq!(err.to_string(), "Invalid version string: x");
    }
}
