use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use upkeep_event_bus::{DownloadBusContainer, DownloadEvent};
use upkeep_types::{DownloadFailure, DownloadProgress, DownloadResult, Version, VersionInfo};
use uuid::Uuid;

use super::error::{UpdateError, UpdateResult};
use super::transport::ArtifactSource;
use super::verify;
use crate::core::host::{AuditEvent, AuditLog};

/// Default spacing between progress events
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

const PARTIAL_SUFFIX: &str = "part";

/// A claimed download slot. Pass it to [`UpdateDownloader::run`] or cancel it
/// with [`UpdateDownloader::cancel_session`]; the slot stays taken until then.
#[derive(Debug)]
pub struct DownloadSession {
    id: Uuid,
    info: VersionInfo,
    cancel: CancellationToken,
}

impl DownloadSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> &VersionInfo {
        &self.info
    }
}

struct ActiveTransfer {
    id: Uuid,
    version: String,
    cancel: CancellationToken,
}

/// Streams release artifacts into the per-user updates directory.
///
/// At most one transfer runs at a time; a second request is rejected rather
/// than queued.
pub struct UpdateDownloader {
    download_dir: PathBuf,
    app_name: String,
    source: Arc<dyn ArtifactSource>,
    bus: DownloadBusContainer,
    audit: Arc<dyn AuditLog>,
    active: Mutex<Option<ActiveTransfer>>,
    progress_interval: Duration,
}

impl UpdateDownloader {
    pub fn new(
        download_dir: impl Into<PathBuf>,
        source: Arc<dyn ArtifactSource>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            download_dir: download_dir.into(),
            app_name: env!("CARGO_PKG_NAME").to_string(),
            source,
            bus: DownloadBusContainer::new(),
            audit,
            active: Mutex::new(None),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Prefix of artifact file names
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn bus(&self) -> &DownloadBusContainer {
        &self.bus
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn is_downloading(&self) -> bool {
        self.active().is_some()
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<ActiveTransfer>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Destination of the artifact for `info`
    pub fn artifact_path(&self, info: &VersionInfo) -> PathBuf {
        let extension = info
            .download_url
            .as_deref()
            .and_then(url_extension)
            .unwrap_or_default();
        self.download_dir
            .join(format!("{}-{}{}", self.app_name, info.version, extension))
    }

    /// Scratch file a session writes before the artifact is complete
    fn partial_path(&self, session: &DownloadSession) -> PathBuf {
        with_partial_suffix(&self.artifact_path(&session.info), session.id)
    }

    /// Whether `path` is named like an artifact this downloader produced
    fn is_artifact(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        let Some(rest) = name
            .strip_prefix(self.app_name.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
        else {
            return false;
        };
        if Version::is_valid(rest) {
            return true;
        }
        rest.rsplit_once('.')
            .is_some_and(|(version, _)| Version::is_valid(version))
    }

    /// Claim the transfer slot for `info`.
    pub fn begin_download(&self, info: &VersionInfo) -> UpdateResult<DownloadSession> {
        if info.download_url.as_deref().is_none_or(str::is_empty) {
            return Err(UpdateError::MissingDownloadUrl);
        }

        let mut active = self.active();
        if let Some(current) = active.as_ref() {
            log::warn!(
                target: "update-download",
                "Rejecting download, another is in progress: requested={} active={}",
                info.version_string,
                current.version
            );
            return Err(UpdateError::DownloadInProgress);
        }

        let session = DownloadSession {
            id: Uuid::new_v4(),
            info: info.clone(),
            cancel: CancellationToken::new(),
        };
        *active = Some(ActiveTransfer {
            id: session.id,
            version: info.version_string.clone(),
            cancel: session.cancel.clone(),
        });
        Ok(session)
    }

    /// Claim the slot and run the transfer. Never fails past this boundary:
    /// every error is reported through the returned [`DownloadResult`].
    pub async fn download_update(&self, info: &VersionInfo) -> DownloadResult {
        match self.begin_download(info) {
            Ok(session) => self.run(session).await,
            Err(e) => {
                log::error!(
                    target: "update-download",
                    "Download not started: version={} error={}",
                    info.version_string,
                    e
                );
                DownloadResult::failed(failure_kind(&e), e.to_string())
            }
        }
    }

    /// Like [`download_update`](Self::download_update), but cancels the
    /// transfer once `stop` resolves and waits for it to clean up.
    pub async fn download_update_until<S>(&self, info: &VersionInfo, stop: S) -> DownloadResult
    where
        S: Future<Output = ()>,
    {
        let transfer = self.download_update(info);
        tokio::pin!(transfer);
        tokio::select! {
            biased;
            result = &mut transfer => result,
            () = stop => {
                self.cancel_download();
                transfer.await
            }
        }
    }

    /// Drive a claimed session to completion, failure or cancellation.
    pub async fn run(&self, session: DownloadSession) -> DownloadResult {
        let version = session.info.version_string.clone();
        let url = session.info.download_url.clone().unwrap_or_default();

        log::info!(
            target: "update-download",
            "Starting update download: version={} url={} session={}",
            version,
            url,
            session.id
        );
        self.audit.log_action(AuditEvent::system(
            "update_download_started",
            true,
            serde_json::json!({ "version": version, "url": url }),
        ));
        self.bus.publish(DownloadEvent::Started {
            session_id: session.id,
            version: version.clone(),
        });

        let outcome = self.transfer(&session).await;
        self.release(session.id);

        match outcome {
            Ok(result) => {
                log::info!(
                    target: "update-download",
                    "Update download completed: version={} path={:?} verified={}",
                    version,
                    result.file_path,
                    result.verified.unwrap_or(false)
                );
                self.audit.log_action(AuditEvent::system(
                    "update_download_completed",
                    true,
                    serde_json::json!({
                        "version": version,
                        "filePath": result.file_path,
                        "checksum": result.checksum,
                        "verified": result.verified,
                    }),
                ));
                self.bus.publish(DownloadEvent::Completed {
                    session_id: session.id,
                    result: result.clone(),
                });
                result
            }
            Err(UpdateError::Cancelled) => {
                // cancel_download already published and audited the cancellation
                log::debug!(target: "update-download", "Transfer stopped: session={}", session.id);
                DownloadResult::failed(DownloadFailure::Cancelled, UpdateError::Cancelled.to_string())
            }
            Err(e) => {
                log::error!(
                    target: "update-download",
                    "Update download failed: version={} error={}",
                    version,
                    e
                );
                self.audit.log_action(AuditEvent::system(
                    "update_download_failed",
                    false,
                    serde_json::json!({ "version": version, "error": e.to_string() }),
                ));
                self.bus.publish(DownloadEvent::Failed {
                    session_id: session.id,
                    error: e.to_string(),
                });
                DownloadResult::failed(failure_kind(&e), e.to_string())
            }
        }
    }

    fn release(&self, id: Uuid) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }

    /// Cancel whatever transfer is active. Returns `false` when idle.
    pub fn cancel_download(&self) -> bool {
        let cancelled = self.active().take();
        match cancelled {
            Some(transfer) => {
                self.finish_cancel(transfer);
                true
            }
            None => false,
        }
    }

    /// Cancel the transfer only if it belongs to `session_id`.
    pub fn cancel_session(&self, session_id: Uuid) -> bool {
        let cancelled = {
            let mut active = self.active();
            if active.as_ref().is_some_and(|a| a.id == session_id) {
                active.take()
            } else {
                None
            }
        };
        match cancelled {
            Some(transfer) => {
                self.finish_cancel(transfer);
                true
            }
            None => false,
        }
    }

    fn finish_cancel(&self, transfer: ActiveTransfer) {
        transfer.cancel.cancel();
        log::info!(
            target: "update-download",
            "Update download cancelled: version={} session={}",
            transfer.version,
            transfer.id
        );
        self.audit.log_action(AuditEvent::system(
            "update_download_cancelled",
            true,
            serde_json::json!({ "version": transfer.version }),
        ));
        self.bus.publish(DownloadEvent::Cancelled {
            session_id: transfer.id,
        });
    }

    async fn transfer(&self, session: &DownloadSession) -> UpdateResult<DownloadResult> {
        tokio::fs::create_dir_all(&self.download_dir).await?;

        let final_path = self.artifact_path(&session.info);
        let partial_path = self.partial_path(session);

        let outcome = self.write_artifact(session, &partial_path, &final_path).await;
        if outcome.is_err() {
            if let Err(e) = tokio::fs::remove_file(&partial_path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!(
                        target: "update-download",
                        "Failed to remove partial download: path={:?} error={}",
                        partial_path,
                        e
                    );
                }
            }
        }
        outcome
    }

    async fn write_artifact(
        &self,
        session: &DownloadSession,
        partial_path: &Path,
        final_path: &Path,
    ) -> UpdateResult<DownloadResult> {
        let checksum = self.stream_to_file(session, partial_path).await?;

        let verified = match session.info.expected_sha256() {
            Some(expected) if expected != checksum => {
                return Err(UpdateError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual: checksum,
                });
            }
            Some(_) => true,
            None => {
                log::warn!(
                    target: "update-download",
                    "No published checksum, artifact left unverified: version={}",
                    session.info.version_string
                );
                false
            }
        };

        if session.cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        tokio::fs::rename(partial_path, final_path).await?;

        Ok(DownloadResult::completed(
            final_path.to_path_buf(),
            checksum,
            verified,
        ))
    }

    /// Copy the artifact stream into `path`, returning the hex SHA-256 of the
    /// bytes written.
    async fn stream_to_file(&self, session: &DownloadSession, path: &Path) -> UpdateResult<String> {
        let url = session.info.download_url.as_deref().unwrap_or_default();
        let stream = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return Err(UpdateError::Cancelled),
            opened = self.source.open(url) => opened?,
        };

        let total = stream.content_length.or(session.info.size).unwrap_or(0);
        let mut chunks = stream.chunks;
        let mut file = tokio::fs::File::create(path).await?;
        let mut hasher = Sha256::new();
        let mut transferred = 0u64;
        let mut tracker = ProgressTracker::new(self.progress_interval, Instant::now());

        loop {
            let next = tokio::select! {
                biased;
                _ = session.cancel.cancelled() => return Err(UpdateError::Cancelled),
                next = chunks.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            transferred += chunk.len() as u64;

            if let Some(progress) = tracker.record(transferred, total, Instant::now()) {
                self.emit_progress(session, progress);
            }
        }

        file.flush().await?;
        if let Some(progress) = tracker.finish(transferred, total, Instant::now()) {
            self.emit_progress(session, progress);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    fn emit_progress(&self, session: &DownloadSession, progress: DownloadProgress) {
        if session.cancel.is_cancelled() {
            return;
        }
        log::debug!(
            target: "update-download",
            "Download progress: percent={:.1} transferred={} total={}",
            progress.percent,
            progress.transferred_human(),
            progress.total_human()
        );
        self.bus.publish(DownloadEvent::Progress {
            session_id: session.id,
            progress,
        });
    }

    /// Delete all but the `keep_last` most recently modified artifacts.
    /// Only files named `<app>-<version>[.ext]` count; partial downloads and
    /// anything else sharing the directory are left alone. Returns how many
    /// files were removed.
    pub async fn cleanup_old_downloads(&self, keep_last: usize) -> UpdateResult<usize> {
        if !self.download_dir.exists() {
            return Ok(0);
        }

        let mut entries = tokio::fs::read_dir(&self.download_dir).await?;
        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;
            if !metadata.is_file() || is_partial(&path) || !self.is_artifact(&path) {
                continue;
            }
            artifacts.push((metadata.modified()?, path));
        }

        artifacts.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = Vec::new();
        for (_, path) in artifacts.into_iter().skip(keep_last) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    log::info!(target: "update-download", "Removed old download: path={:?}", path);
                    removed.push(path);
                }
                Err(e) => {
                    log::warn!(
                        target: "update-download",
                        "Failed to remove old download: path={:?} error={}",
                        path,
                        e
                    );
                }
            }
        }

        self.audit.log_action(AuditEvent::system(
            "update_cleanup",
            true,
            serde_json::json!({ "keepLast": keep_last, "removed": removed }),
        ));
        Ok(removed.len())
    }

    /// `true` when the file's SHA-256 equals `expected` exactly.
    /// Read errors are logged and reported as `false`.
    pub async fn verify_checksum(&self, path: &Path, expected: &str) -> bool {
        match verify::verify_sha256(path, expected).await {
            Ok(()) => true,
            Err(UpdateError::ChecksumMismatch { expected, actual }) => {
                log::warn!(
                    target: "update-download",
                    "Checksum mismatch: path={:?} expected={} actual={}",
                    path,
                    expected,
                    actual
                );
                false
            }
            Err(e) => {
                log::error!(
                    target: "update-download",
                    "Checksum verification failed: path={:?} error={}",
                    path,
                    e
                );
                false
            }
        }
    }
}

fn failure_kind(error: &UpdateError) -> DownloadFailure {
    match error {
        UpdateError::MissingDownloadUrl => DownloadFailure::MissingUrl,
        UpdateError::DownloadInProgress => DownloadFailure::AlreadyInProgress,
        UpdateError::ChecksumMismatch { .. } => DownloadFailure::ChecksumMismatch,
        UpdateError::Cancelled => DownloadFailure::Cancelled,
        UpdateError::Io(_) => DownloadFailure::Io,
        _ => DownloadFailure::Transfer,
    }
}

/// Extension of the last URL path segment, including the dot
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let segment = path.rsplit('/').next()?;
    Path::new(segment)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
}

fn with_partial_suffix(path: &Path, session_id: Uuid) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.{}", session_id.simple(), PARTIAL_SUFFIX));
    PathBuf::from(name)
}

fn is_partial(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX)
}

/// Decides when a progress event is due and measures speed over the last
/// emission window.
struct ProgressTracker {
    interval: Duration,
    window_start: Instant,
    window_bytes: u64,
    emitted_any: bool,
    last_emitted: u64,
}

impl ProgressTracker {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            window_start: now,
            window_bytes: 0,
            emitted_any: false,
            last_emitted: 0,
        }
    }

    fn record(&mut self, transferred: u64, total: u64, now: Instant) -> Option<DownloadProgress> {
        if self.emitted_any && now.duration_since(self.window_start) < self.interval {
            return None;
        }
        Some(self.emit(transferred, total, now))
    }

    /// Progress for the last chunk, unless it was already reported
    fn finish(&mut self, transferred: u64, total: u64, now: Instant) -> Option<DownloadProgress> {
        if self.emitted_any && self.last_emitted == transferred {
            return None;
        }
        let total = if total == 0 { transferred } else { total };
        Some(self.emit(transferred, total, now))
    }

    fn emit(&mut self, transferred: u64, total: u64, now: Instant) -> DownloadProgress {
        let elapsed = now.duration_since(self.window_start).as_secs_f64();
        let speed = if elapsed > 0.0 {
            transferred.saturating_sub(self.window_bytes) as f64 / elapsed
        } else {
            0.0
        };

        self.window_start = now;
        self.window_bytes = transferred;
        self.emitted_any = true;
        self.last_emitted = transferred;
        DownloadProgress::new(transferred, total, speed)
    }
}
