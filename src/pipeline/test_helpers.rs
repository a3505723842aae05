//! In-memory collaborators and harness for pipeline tests.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};

use super::Pipeline;
use crate::config::Config;
use crate::display::ProgressSink;
use crate::error::TransferError;
use crate::network::{ContentSource, ContentStream};
use crate::queue::{self, BoundedQueue, QueueReceiver};
use crate::storage::{Storage, StorageFile};
use crate::types::{ChunkBuffer, Event};

/// How a scripted URL answers
#[derive(Clone)]
pub(crate) enum Script {
    /// Connection refused / TLS failure
    ConnectError,
    /// Non-2xx answer
    Status(u16),
    /// A body, optionally cut short
    Body {
        data: Vec<u8>,
        content_length: Option<u64>,
        /// Stream ends (EOF) after this many bytes
        eof_after: Option<usize>,
        /// Read fails after this many bytes
        error_after: Option<usize>,
    },
    /// Never answers until the gate is notified, then fails to connect
    Hang(Arc<Notify>),
}

impl Script {
    /// A complete body with a matching content length
    pub(crate) fn body(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Script::Body {
            data,
            content_length: Some(len),
            eof_after: None,
            error_after: None,
        }
    }

    /// A complete body sent without a content length
    pub(crate) fn unsized_body(data: Vec<u8>) -> Self {
        Script::Body {
            data,
            content_length: None,
            eof_after: None,
            error_after: None,
        }
    }
}

/// Scripted [`ContentSource`]; unknown URLs answer 404
#[derive(Clone, Default)]
pub(crate) struct ScriptedSource {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    link_down: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
    pub(crate) open_signal: Arc<Notify>,
}

impl ScriptedSource {
    pub(crate) fn with(self, url: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
        self
    }

    pub(crate) fn set_link_down(&self, down: bool) {
        self.link_down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ContentSource for ScriptedSource {
    fn link_up(&self) -> bool {
        !self.link_down.load(Ordering::SeqCst)
    }

    async fn open_stream(
        &self,
        url: &str,
    ) -> std::result::Result<Box<dyn ContentStream>, TransferError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_signal.notify_one();

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Script::Status(404));

        match script {
            Script::ConnectError => Err(TransferError::Network {
                reason: "connection refused".into(),
            }),
            Script::Status(status) => Err(TransferError::HttpStatus { status }),
            Script::Hang(gate) => {
                gate.notified().await;
                Err(TransferError::Network {
                    reason: "timed out".into(),
                })
            }
            Script::Body {
                data,
                content_length,
                eof_after,
                error_after,
            } => Ok(Box::new(ScriptedStream {
                data: Bytes::from(data),
                pos: 0,
                content_length,
                eof_after,
                error_after,
            })),
        }
    }
}

struct ScriptedStream {
    data: Bytes,
    pos: usize,
    content_length: Option<u64>,
    eof_after: Option<usize>,
    error_after: Option<usize>,
}

#[async_trait::async_trait]
impl ContentStream for ScriptedStream {
    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    async fn read_chunk(
        &mut self,
        max_len: usize,
    ) -> std::result::Result<Option<Bytes>, TransferError> {
        if let Some(limit) = self.error_after
            && self.pos >= limit
        {
            return Err(TransferError::Network {
                reason: "connection reset".into(),
            });
        }
        let end_of_data = self.eof_after.unwrap_or(self.data.len()).min(self.data.len());
        let mut stop = end_of_data;
        if let Some(limit) = self.error_after {
            stop = stop.min(limit);
        }
        if self.pos >= stop {
            return Ok(None);
        }
        let end = (self.pos + max_len).min(stop);
        let bytes = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(Some(bytes))
    }
}

#[derive(Default)]
struct MemoryMedium {
    files: HashMap<PathBuf, Vec<u8>>,
    open: Vec<PathBuf>,
    opened_paths: Vec<PathBuf>,
}

/// In-memory [`Storage`] with a removable medium and write-fault injection
#[derive(Clone)]
pub(crate) struct MemoryStorage {
    medium: Arc<Mutex<MemoryMedium>>,
    present: Arc<AtomicBool>,
    reinit_restores: Arc<AtomicBool>,
    reinit_calls: Arc<AtomicUsize>,
    /// Writes accept at most this many bytes (usize::MAX = no limit)
    write_limit: Arc<AtomicUsize>,
    fail_open: Arc<AtomicBool>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            medium: Arc::default(),
            present: Arc::new(AtomicBool::new(true)),
            reinit_restores: Arc::new(AtomicBool::new(false)),
            reinit_calls: Arc::default(),
            write_limit: Arc::new(AtomicUsize::new(usize::MAX)),
            fail_open: Arc::default(),
        }
    }
}

impl MemoryStorage {
    pub(crate) fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub(crate) fn set_reinit_restores(&self, restores: bool) {
        self.reinit_restores.store(restores, Ordering::SeqCst);
    }

    pub(crate) fn set_write_limit(&self, limit: usize) {
        self.write_limit.store(limit, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn reinit_calls(&self) -> usize {
        self.reinit_calls.load(Ordering::SeqCst)
    }

    /// Contents of `name` under the default base directory
    pub(crate) fn file(&self, name: &str) -> Option<Vec<u8>> {
        let path = Config::default().storage.base_dir.join(name);
        self.medium.lock().unwrap().files.get(&path).cloned()
    }

    pub(crate) fn file_count(&self) -> usize {
        self.medium.lock().unwrap().files.len()
    }

    /// Files still open
    pub(crate) fn open_files(&self) -> Vec<PathBuf> {
        self.medium.lock().unwrap().open.clone()
    }

    /// Every path opened, in order
    pub(crate) fn opened_paths(&self) -> Vec<PathBuf> {
        self.medium.lock().unwrap().opened_paths.clone()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn medium_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    async fn reinit(&self) -> bool {
        self.reinit_calls.fetch_add(1, Ordering::SeqCst);
        if self.reinit_restores.load(Ordering::SeqCst) {
            self.set_present(true);
        }
        self.present.load(Ordering::SeqCst)
    }

    async fn open(&self, path: &Path) -> std::io::Result<Box<dyn StorageFile>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only medium",
            ));
        }
        let mut medium = self.medium.lock().unwrap();
        medium.files.insert(path.to_path_buf(), Vec::new());
        medium.open.push(path.to_path_buf());
        medium.opened_paths.push(path.to_path_buf());
        Ok(Box::new(MemoryFile {
            path: path.to_path_buf(),
            storage: self.clone(),
        }))
    }
}

struct MemoryFile {
    path: PathBuf,
    storage: MemoryStorage,
}

#[async_trait::async_trait]
impl StorageFile for MemoryFile {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        let accepted = bytes.len().min(self.storage.write_limit.load(Ordering::SeqCst));
        let mut medium = self.storage.medium.lock().unwrap();
        if let Some(file) = medium.files.get_mut(&self.path) {
            file.extend_from_slice(&bytes[..accepted]);
        }
        Ok(accepted)
    }

    async fn close(self: Box<Self>) -> std::io::Result<()> {
        let mut medium = self.storage.medium.lock().unwrap();
        medium.open.retain(|p| p != &self.path);
        Ok(())
    }
}

/// [`ProgressSink`] that records every report
#[derive(Clone, Default)]
pub(crate) struct RecordingProgress {
    reports: Arc<Mutex<Vec<(u32, u8)>>>,
}

impl RecordingProgress {
    pub(crate) fn reports(&self) -> Vec<(u32, u8)> {
        self.reports.lock().unwrap().clone()
    }

    pub(crate) fn percents_for(&self, file_number: u32) -> Vec<u8> {
        self.reports()
            .into_iter()
            .filter(|(n, _)| *n == file_number)
            .map(|(_, p)| p)
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn report_progress(&self, file_number: u32, percent: u8) {
        self.reports.lock().unwrap().push((file_number, percent));
    }
}

/// Config with short timeouts so failure paths finish quickly
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.storage.reinit_settle_delay = Duration::from_millis(5);
    config.pipeline.shutdown_timeout = Duration::from_secs(5);
    config
}

/// A started pipeline with in-memory collaborators
pub(crate) struct Harness {
    pub(crate) pipeline: Pipeline,
    pub(crate) source: ScriptedSource,
    pub(crate) storage: MemoryStorage,
    pub(crate) progress: RecordingProgress,
    pub(crate) events: broadcast::Receiver<Event>,
}

pub(crate) async fn start_pipeline(source: ScriptedSource, storage: MemoryStorage) -> Harness {
    start_pipeline_with(test_config(), source, storage).await
}

pub(crate) async fn start_pipeline_with(
    config: Config,
    source: ScriptedSource,
    storage: MemoryStorage,
) -> Harness {
    let progress = RecordingProgress::default();
    let pipeline = Pipeline::new(
        config,
        Arc::new(source.clone()),
        Box::new(storage.clone()),
        Arc::new(progress.clone()),
    )
    .unwrap();
    let events = pipeline.subscribe();
    pipeline.init(64 * 1024).await.unwrap();

    Harness {
        pipeline,
        source,
        storage,
        progress,
        events,
    }
}

/// Drain every event received so far
pub(crate) fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

/// A chunk queue sized like production, plus its receiver
pub(crate) fn chunk_queue() -> (BoundedQueue<ChunkBuffer>, QueueReceiver<ChunkBuffer>) {
    let config = Config::default();
    queue::bounded(
        "chunk",
        config.pipeline.chunk_queue_capacity,
        config.pipeline.chunk_send_timeout,
    )
}

/// Every chunk left in a closed queue
pub(crate) async fn collect_chunks(mut rx: QueueReceiver<ChunkBuffer>) -> Vec<ChunkBuffer> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

/// `len` bytes of a repeating, position-dependent pattern
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
