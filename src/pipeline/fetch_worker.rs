//! Fetch worker: URL queue → HTTPS stream → chunk queue.
//!
//! For every request taken off the URL queue the worker emits a sequence of
//! data chunks followed by exactly one end-of-file marker, whatever happens
//! to the fetch. No retries: a failed file is terminated and the next
//! request is processed.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::display::ProgressSink;
use crate::error::{Error, Result, TransferError};
use crate::network::ContentSource;
use crate::queue::{BoundedQueue, QueueReceiver};
use crate::types::{ChunkBuffer, Event, FileName, TransferOutcome, UrlRequest};
use crate::utils::{derive_filename, progress_percent};

/// Running totals for the file being fetched
#[derive(Debug, Default)]
struct FileProgress {
    bytes: u64,
    chunks: u32,
}

pub(crate) struct FetchWorker {
    pub(crate) urls: QueueReceiver<UrlRequest>,
    pub(crate) chunks: BoundedQueue<ChunkBuffer>,
    pub(crate) source: Arc<dyn ContentSource>,
    pub(crate) progress: Arc<dyn ProgressSink>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) chunk_size: usize,
    pub(crate) fallback_filename: String,
    pub(crate) file_number: u32,
}

impl FetchWorker {
    /// Process requests until the URL queue closes
    pub(crate) async fn run(mut self) {
        tracing::info!("Fetch worker started");

        while let Some(request) = self.urls.recv().await {
            self.file_number += 1;
            self.process(&request).await;
        }

        tracing::info!(files = self.file_number, "Fetch worker stopped");
    }

    async fn process(&self, request: &UrlRequest) {
        let file_number = self.file_number;
        let filename = derive_filename(request.url(), &self.fallback_filename);
        tracing::info!(file_number, key = request.key(), filename = %filename, "Processing download request");

        let mut progress = FileProgress::default();
        let result = self
            .stream_file(file_number, request.url(), &filename, &mut progress)
            .await;

        let outcome = match &result {
            Ok(()) => {
                tracing::info!(file_number, filename = %filename, bytes = progress.bytes, chunks = progress.chunks, "Download complete");
                let _ = self.event_tx.send(Event::FetchComplete {
                    file_number,
                    filename: filename.to_string(),
                    bytes: progress.bytes,
                });
                TransferOutcome::Complete
            }
            Err(e) => {
                tracing::warn!(file_number, filename = %filename, bytes = progress.bytes, error = %e, "Download failed");
                let _ = self.event_tx.send(Event::FetchFailed {
                    file_number,
                    filename: filename.to_string(),
                    bytes: progress.bytes,
                    error_code: e.error_code().to_string(),
                    error: e.to_string(),
                });
                TransferOutcome::Failed
            }
        };

        // A successful fetch that produced no data chunk is a zero-byte file:
        // its marker carries the name so the writer still creates it.
        let marker_name = if outcome == TransferOutcome::Complete && progress.chunks == 0 {
            filename.clone()
        } else {
            FileName::empty()
        };

        match self
            .chunks
            .send(ChunkBuffer::end_of_file(outcome, marker_name))
            .await
        {
            Ok(()) => tracing::debug!(file_number, filename = %filename, ?outcome, "Sent end-of-file marker"),
            Err(e) => tracing::error!(file_number, filename = %filename, error = %e, "CRITICAL: failed to send end-of-file marker"),
        }
    }

    /// Connect and stream one file into the chunk queue.
    ///
    /// Returning early drops the stream, releasing the connection.
    async fn stream_file(
        &self,
        file_number: u32,
        url: &str,
        filename: &FileName,
        progress: &mut FileProgress,
    ) -> Result<()> {
        if !self.source.link_up() {
            return Err(TransferError::Network {
                reason: "network link down".into(),
            }
            .into());
        }

        let mut stream = self.source.open_stream(url).await?;
        let expected = stream.content_length();
        tracing::info!(file_number, filename = %filename, expected = ?expected, "Connected");

        if expected == Some(0) {
            self.report(file_number, filename, 100);
            return Ok(());
        }

        loop {
            let want = match expected {
                Some(total) => {
                    let remaining = total.saturating_sub(progress.bytes);
                    if remaining == 0 {
                        break;
                    }
                    usize::try_from(remaining).map_or(self.chunk_size, |r| r.min(self.chunk_size))
                }
                None => self.chunk_size,
            };

            let Some(data) = stream.read_chunk(want).await? else {
                if let Some(total) = expected
                    && progress.bytes < total
                {
                    return Err(TransferError::Network {
                        reason: format!(
                            "stream closed after {} of {total} bytes",
                            progress.bytes
                        ),
                    }
                    .into());
                }
                break;
            };
            if data.is_empty() {
                continue;
            }

            let len = data.len() as u64;
            let name = if progress.chunks == 0 {
                filename.clone()
            } else {
                FileName::empty()
            };
            let chunk = ChunkBuffer::data(data, name)?;

            if let Err(e) = self.chunks.send(chunk).await {
                if matches!(e, Error::Transfer(TransferError::QueueFull { .. })) {
                    tracing::error!(file_number, filename = %filename, bytes = progress.bytes, "CRITICAL: chunk lost, write worker stalled");
                }
                return Err(e);
            }
            progress.bytes += len;
            progress.chunks += 1;
            tracing::debug!(file_number, bytes = progress.bytes, expected = ?expected, "Chunk queued");

            if let Some(percent) = progress_percent(progress.bytes, expected) {
                self.report(file_number, filename, percent);
            }
        }

        if expected.is_none() {
            self.report(file_number, filename, 100);
        }
        Ok(())
    }

    fn report(&self, file_number: u32, filename: &FileName, percent: u8) {
        self.progress.report_progress(file_number, percent);
        let _ = self.event_tx.send(Event::Downloading {
            file_number,
            filename: filename.to_string(),
            percent,
        });
    }
}
