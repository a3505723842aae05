//! # sample-dl
//!
//! Chunked HTTPS-to-removable-storage transfer pipeline for networked
//! sampler devices.
//!
//! Two workers connected by two bounded queues move files from presigned
//! HTTPS URLs onto the storage medium without ever buffering a whole file:
//!
//! - the **fetch worker** takes one URL at a time off the URL queue, streams
//!   the body and slices it into chunks of at most 1024 bytes;
//! - the **write worker** drains the chunk queue and writes each file under
//!   the sampler's sample directory.
//!
//! Every file crosses the chunk queue as a framed sequence: data chunks,
//! then exactly one end-of-file marker, whatever happened to the fetch.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sample_dl::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::from_config(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     pipeline.init(64 * 1024).await?;
//!     pipeline
//!         .submit("https://bucket.s3.amazonaws.com/kits/kick.wav", "kits/kick.wav")
//!         .await?;
//!
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Shared registration and link state
pub mod device;
/// Inbound message routing
pub mod dispatch;
/// Progress display
pub mod display;
/// Error types
pub mod error;
/// HTTPS content source
pub mod network;
/// Transfer pipeline and its workers
pub mod pipeline;
/// Bounded queues with timed sends
pub mod queue;
/// Device registration helpers
pub mod registration;
/// Storage medium access
pub mod storage;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DeviceConfig, NetworkConfig, PipelineConfig, StorageConfig};
pub use device::{DeviceStateReader, DeviceStateWriter, DeviceStatus, device_state};
pub use dispatch::{BatchEntry, Dispatch, Dispatcher};
pub use display::{LogDisplay, ProgressSink, Screen};
pub use error::{Error, Result, TransferError};
pub use network::{ContentSource, ContentStream, HttpsSource};
pub use pipeline::{Pipeline, ResourcePlan};
pub use storage::{FsStorage, Storage, StorageFile, StorageStatus};
pub use types::{ChunkBuffer, Event, FileName, TransferOutcome, UrlRequest};

/// Run the pipeline until the process is asked to terminate, then drain it.
///
/// Listens for SIGTERM and Ctrl+C on unix, Ctrl+C elsewhere. Files already
/// queued still finish before this returns.
///
/// # Example
///
/// ```no_run
/// use sample_dl::{Config, Pipeline, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = Pipeline::from_config(Config::default())?;
///     pipeline.init(64 * 1024).await?;
///
///     run_with_shutdown(pipeline).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(pipeline: Pipeline) -> Result<()> {
    shutdown_on(pipeline, termination_requested()).await
}

/// Drain the pipeline once `trigger` completes
pub async fn shutdown_on<F>(pipeline: Pipeline, trigger: F) -> Result<()>
where
    F: std::future::Future<Output = ()>,
{
    trigger.await;
    let pending = pipeline.pending_requests().await;
    tracing::info!(
        pending,
        "Termination requested, draining transfer pipeline"
    );
    pipeline.shutdown().await
}

#[cfg(unix)]
async fn termination_requested() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM unavailable, stopping on Ctrl+C only");
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "Received termination signal"),
        _ = ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn termination_requested() {
    ctrl_c().await;
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "SIGINT", "Received termination signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_helpers::{
        MemoryStorage, Script, ScriptedSource, drain_events, pattern, start_pipeline,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_drains_queued_files_before_returning() {
        let url = "https://bucket.s3.amazonaws.com/kits/ride.wav";
        let source = ScriptedSource::default().with(url, Script::body(pattern(2048)));
        let mut h = start_pipeline(source, MemoryStorage::default()).await;
        h.pipeline.submit(url, "kits/ride.wav").await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let runner = tokio::spawn(shutdown_on(h.pipeline.clone(), async {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!runner.is_finished());

        tx.send(()).unwrap();
        runner.await.unwrap().unwrap();

        assert_eq!(h.storage.file("ride.wav").unwrap(), pattern(2048));
        assert_eq!(drain_events(&mut h.events).last(), Some(&Event::Shutdown));
        assert!(matches!(
            h.pipeline.submit(url, "kits/ride.wav").await,
            Err(Error::ShuttingDown)
        ));
    }
}
