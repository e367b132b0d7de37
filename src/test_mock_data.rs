//! Fakes shared by the updater unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use futures::channel::mpsc;
use tokio::sync::Notify;
use upkeep_types::{ReleaseChannel, UpdateManifest, VersionInfo};

use crate::core::host::{AuditEvent, AuditLog, ClickHandler, Notifier, RendererChannel};
use crate::core::updater::{
    ArtifactSource, ArtifactStream, Clock, ReleaseFeed, UpdateError, UpdateResult,
};

const MOCK_ENDPOINT: &str = "mock://feed";

/// Manifest with one entry per `(channel, version)`
pub fn manifest_with(entries: &[(ReleaseChannel, &str)]) -> UpdateManifest {
    let released = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    let latest_versions: BTreeMap<_, _> = entries
        .iter()
        .map(|(channel, version)| {
            let info = VersionInfo::parse(version, released)
                .unwrap()
                .with_channel(*channel)
                .with_changelog(format!("Release {}", version))
                .with_download_url(format!("https://example.com/upkeep-{}.exe", version));
            (*channel, info)
        })
        .collect();

    UpdateManifest {
        latest_versions,
        minimum_version: "0.0.0".to_string(),
        deprecated_versions: Vec::new(),
        release_notes: Vec::new(),
    }
}

// ============================================================================
// Clock
// ============================================================================

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Feeds
// ============================================================================

enum FeedReply {
    Manifest(UpdateManifest),
    Fail(String),
}

/// Answers every fetch with the same manifest or the same failure.
pub struct ScriptedFeed {
    reply: FeedReply,
    calls: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new(manifest: UpdateManifest) -> Self {
        Self {
            reply: FeedReply::Manifest(manifest),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: FeedReply::Fail(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseFeed for ScriptedFeed {
    async fn fetch_manifest(&self) -> UpdateResult<UpdateManifest> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            FeedReply::Manifest(manifest) => Ok(manifest.clone()),
            FeedReply::Fail(message) => Err(UpdateError::Fetch {
                endpoint: MOCK_ENDPOINT.to_string(),
                message: message.clone(),
            }),
        }
    }

    fn endpoint(&self) -> String {
        MOCK_ENDPOINT.to_string()
    }
}

/// Holds every fetch until [`GatedFeed::release`] is called.
pub struct GatedFeed {
    manifest: UpdateManifest,
    calls: AtomicUsize,
    entered: Notify,
    gate: Notify,
}

impl GatedFeed {
    pub fn new(manifest: UpdateManifest) -> Self {
        Self {
            manifest,
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            gate: Notify::new(),
        }
    }

    /// Resolves once a fetch is waiting at the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseFeed for GatedFeed {
    async fn fetch_manifest(&self) -> UpdateResult<UpdateManifest> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(self.manifest.clone())
    }

    fn endpoint(&self) -> String {
        MOCK_ENDPOINT.to_string()
    }
}

// ============================================================================
// Artifact sources
// ============================================================================

/// Serves a fixed body in chunks of `chunk_size`.
pub struct StaticArtifactSource {
    body: Vec<u8>,
    chunk_size: usize,
    fail_after: Option<usize>,
}

impl StaticArtifactSource {
    pub fn new(body: &[u8], chunk_size: usize) -> Self {
        Self {
            body: body.to_vec(),
            chunk_size,
            fail_after: None,
        }
    }

    /// Break the stream after `chunks` chunks
    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }
}

#[async_trait]
impl ArtifactSource for StaticArtifactSource {
    async fn open(&self, _url: &str) -> UpdateResult<ArtifactStream> {
        let mut chunks: Vec<UpdateResult<Bytes>> = self
            .body
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();

        if let Some(limit) = self.fail_after {
            chunks.truncate(limit);
            chunks.push(Err(UpdateError::DownloadFailed {
                message: "connection reset".to_string(),
            }));
        }

        Ok(ArtifactStream {
            content_length: Some(self.body.len() as u64),
            chunks: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// Streams whatever the test pushes through the paired sender. Opens once.
pub struct ChannelArtifactSource {
    content_length: Option<u64>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<UpdateResult<Bytes>>>>,
}

impl ChannelArtifactSource {
    pub fn new(
        content_length: Option<u64>,
    ) -> (Self, mpsc::UnboundedSender<UpdateResult<Bytes>>) {
        let (sender, receiver) = mpsc::unbounded();
        let source = Self {
            content_length,
            receiver: Mutex::new(Some(receiver)),
        };
        (source, sender)
    }
}

#[async_trait]
impl ArtifactSource for ChannelArtifactSource {
    async fn open(&self, _url: &str) -> UpdateResult<ArtifactStream> {
        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| UpdateError::DownloadFailed {
                message: "artifact already opened".to_string(),
            })?;

        Ok(ArtifactStream {
            content_length: self.content_length,
            chunks: receiver.boxed(),
        })
    }
}

// ============================================================================
// Host collaborators
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, String)>>,
    handlers: Mutex<Vec<ClickHandler>>,
}

impl RecordingNotifier {
    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().unwrap().clone()
    }

    /// Simulate a click on the `index`-th notification
    pub fn click(&self, index: usize) {
        let handlers = self.handlers.lock().unwrap();
        (handlers[index])();
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, title: &str, body: &str, on_click: ClickHandler) {
        self.shown
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        self.handlers.lock().unwrap().push(on_click);
    }
}

#[derive(Default)]
pub struct RecordingRenderer {
    sent: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingRenderer {
    pub fn sent(&self) -> Vec<(String, serde_json::Value)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn channels(&self) -> Vec<String> {
        self.sent().into_iter().map(|(channel, _)| channel).collect()
    }
}

impl RendererChannel for RecordingRenderer {
    fn send(&self, channel: &str, payload: serde_json::Value) {
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), payload));
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAudit {
    pub fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.action.clone())
            .collect()
    }
}

impl AuditLog for RecordingAudit {
    fn log_action(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}
