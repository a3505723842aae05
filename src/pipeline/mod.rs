//! Chunked file-transfer pipeline and its supervisor.
//!
//! Two independent workers connected by two bounded queues:
//! - [`fetch_worker`] - takes one URL at a time, streams it, slices it into chunks
//! - [`write_worker`] - writes chunk sequences to files on the storage medium
//!
//! The URL queue (capacity 5) absorbs bursts of inbound requests; the chunk
//! queue (capacity 2) is the backpressure valve that slows network reads to
//! storage speed.

mod fetch_worker;
mod write_worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::display::{LogDisplay, ProgressSink};
use crate::error::{Error, Result};
use crate::network::{ContentSource, HttpsSource};
use crate::queue::{self, BoundedQueue};
use crate::storage::{FsStorage, Storage};
use crate::types::{ChunkBuffer, Event, UrlRequest};

use fetch_worker::FetchWorker;
use write_worker::WriteWorker;

/// Per-worker resource allowance, computed once at startup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourcePlan {
    /// Stack allowance per worker in bytes
    pub stack_size: usize,
}

impl ResourcePlan {
    /// Size workers from the memory available at startup.
    ///
    /// Half the free memory is left to the rest of the device (network
    /// stack, TLS); the other half is split between the two workers and
    /// clamped to `[min, max]`.
    pub fn from_free_memory(free_memory: usize, min: usize, max: usize) -> Self {
        Self {
            stack_size: (free_memory / 4).clamp(min, max),
        }
    }
}

/// External collaborators the workers own once started
struct Collaborators {
    source: Arc<dyn ContentSource>,
    storage: Box<dyn Storage>,
    progress: Arc<dyn ProgressSink>,
}

struct Running {
    url_queue: BoundedQueue<UrlRequest>,
    plan: ResourcePlan,
    fetch: JoinHandle<()>,
    write: JoinHandle<()>,
}

enum State {
    Created(Collaborators),
    Running(Running),
    Stopped,
}

struct Inner {
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    ready_tx: watch::Sender<bool>,
    state: Mutex<State>,
}

/// Handle to the transfer pipeline (cloneable, all clones share one pipeline)
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    /// Create a pipeline around the given collaborators. Nothing runs until [`init`](Self::init).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is invalid.
    pub fn new(
        config: Config,
        source: Arc<dyn ContentSource>,
        storage: Box<dyn Storage>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(1000);
        let (ready_tx, _ready_rx) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                event_tx,
                ready_tx,
                state: Mutex::new(State::Created(Collaborators {
                    source,
                    storage,
                    progress,
                })),
            }),
        })
    }

    /// Create a pipeline with the production collaborators: HTTPS fetches,
    /// filesystem storage at the configured mount point, log-rendered progress.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or when the HTTPS client cannot be built.
    pub fn from_config(config: Config) -> Result<Self> {
        let source = HttpsSource::new(&config.network)?;
        let storage = FsStorage::new(config.storage.mount_point.clone());
        Self::new(config, Arc::new(source), Box::new(storage), Arc::new(LogDisplay))
    }

    /// Build the queues and start both workers.
    ///
    /// `free_memory` is the memory available at startup; it sizes the
    /// per-worker allowance. Calling again after a successful start is a
    /// no-op that returns the plan already in effect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once the pipeline has been shut down.
    pub async fn init(&self, free_memory: usize) -> Result<ResourcePlan> {
        let mut state = self.inner.state.lock().await;

        let collaborators = match std::mem::replace(&mut *state, State::Stopped) {
            State::Created(collaborators) => collaborators,
            State::Running(running) => {
                let plan = running.plan;
                *state = State::Running(running);
                tracing::debug!("Pipeline already initialized");
                return Ok(plan);
            }
            State::Stopped => return Err(Error::ShuttingDown),
        };

        let config = &self.inner.config;
        let p = &config.pipeline;
        let plan = ResourcePlan::from_free_memory(free_memory, p.min_stack_size, p.max_stack_size);
        tracing::info!(free_memory, stack_size = plan.stack_size, "Initializing transfer pipeline");

        let (url_queue, url_rx) =
            queue::bounded::<UrlRequest>("url", p.url_queue_capacity, p.submit_timeout);
        let (chunk_queue, chunk_rx) =
            queue::bounded::<ChunkBuffer>("chunk", p.chunk_queue_capacity, p.chunk_send_timeout);

        let fetch = FetchWorker {
            urls: url_rx,
            chunks: chunk_queue,
            source: collaborators.source,
            progress: collaborators.progress,
            event_tx: self.inner.event_tx.clone(),
            chunk_size: p.chunk_size,
            fallback_filename: config.network.fallback_filename.clone(),
            file_number: 0,
        };
        let write = WriteWorker {
            chunks: chunk_rx,
            storage: collaborators.storage,
            base_dir: config.storage.base_dir.clone(),
            settle_delay: config.storage.reinit_settle_delay,
            event_tx: self.inner.event_tx.clone(),
        };

        // Tokio tasks run on runtime-managed stacks; the plan is recorded
        // per worker and reported, not enforced.
        tracing::info!(worker = "fetch", stack_size = plan.stack_size, "Starting worker");
        let fetch = tokio::spawn(fetch.run());
        tracing::info!(worker = "write", stack_size = plan.stack_size, "Starting worker");
        let write = tokio::spawn(write.run());

        *state = State::Running(Running {
            url_queue,
            plan,
            fetch,
            write,
        });
        drop(state);

        self.inner.ready_tx.send_replace(true);
        Ok(plan)
    }

    /// Wait until [`init`](Self::init) has built the queues and started the workers
    pub async fn ready(&self) {
        let mut rx = self.inner.ready_tx.subscribe();
        // The sender lives in `inner`, which outlives this borrow
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Queue a file for download, waiting at most the submit timeout for space.
    ///
    /// The request is dropped on failure; there is no retry.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] for an empty url or key, or an over-long url
    /// - [`Error::NotInitialized`] before [`init`](Self::init)
    /// - [`Error::Transfer`] with `QueueFull` when the queue stayed full
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    pub async fn submit(&self, url: &str, key: &str) -> Result<()> {
        let request = match UrlRequest::new(url, key, self.inner.config.pipeline.url_max_len) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(key, error = %e, "Rejected download request");
                return Err(e);
            }
        };

        let url_queue = {
            let state = self.inner.state.lock().await;
            match &*state {
                State::Running(running) => running.url_queue.clone(),
                State::Created(_) => return Err(Error::NotInitialized),
                State::Stopped => return Err(Error::ShuttingDown),
            }
        };

        match url_queue.send(request).await {
            Ok(()) => {
                tracing::info!(key, "Enqueued download request");
                let _ = self.inner.event_tx.send(Event::Queued {
                    key: key.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to enqueue download request");
                Err(e)
            }
        }
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.event_tx.subscribe()
    }

    /// The plan in effect, if started
    pub async fn resource_plan(&self) -> Option<ResourcePlan> {
        match &*self.inner.state.lock().await {
            State::Running(running) => Some(running.plan),
            _ => None,
        }
    }

    /// Requests waiting in the URL queue
    pub async fn pending_requests(&self) -> usize {
        match &*self.inner.state.lock().await {
            State::Running(running) => running.url_queue.len(),
            _ => 0,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Stop accepting requests and let both workers drain.
    ///
    /// Requests already queued are still fetched and written. Waits up to
    /// the configured shutdown timeout for the workers to finish.
    pub async fn shutdown(&self) -> Result<()> {
        let running = {
            let mut state = self.inner.state.lock().await;
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(running) => running,
                _ => {
                    tracing::debug!("Pipeline not running, nothing to shut down");
                    return Ok(());
                }
            }
        };
        tracing::info!("Shutting down transfer pipeline");

        let Running {
            url_queue,
            fetch,
            write,
            ..
        } = running;
        // Closing the URL queue ends the fetch worker, which closes the chunk queue
        drop(url_queue);

        let timeout = self.inner.config.pipeline.shutdown_timeout;
        let workers = async {
            if let Err(e) = fetch.await {
                tracing::error!(error = %e, "Fetch worker panicked");
            }
            if let Err(e) = write.await {
                tracing::error!(error = %e, "Write worker panicked");
            }
        };
        if tokio::time::timeout(timeout, workers).await.is_err() {
            tracing::warn!(?timeout, "Timeout waiting for workers to drain");
        }

        let _ = self.inner.event_tx.send(Event::Shutdown);
        tracing::info!("Transfer pipeline stopped");
        Ok(())
    }
}
