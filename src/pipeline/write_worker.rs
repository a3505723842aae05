//! Write worker: chunk queue → files on the storage medium.
//!
//! Consumes the framed chunk stream and keeps exactly one file open at a
//! time. Any failure abandons the current file and drains chunks up to the
//! next end-of-file marker, so one bad file never shifts the framing of the
//! next.

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::TransferError;
use crate::queue::QueueReceiver;
use crate::storage::{Storage, StorageFile};
use crate::types::{ChunkBuffer, Event, FileName, TransferOutcome};

/// A file being written
struct OpenFile {
    file: Box<dyn StorageFile>,
    filename: FileName,
    path: PathBuf,
    written: u64,
}

enum WriterState {
    Idle,
    FileOpen(OpenFile),
    /// Discarding chunks until the current sequence's end-of-file marker
    ResyncDrain,
}

pub(crate) struct WriteWorker {
    pub(crate) chunks: QueueReceiver<ChunkBuffer>,
    pub(crate) storage: Box<dyn Storage>,
    pub(crate) base_dir: PathBuf,
    pub(crate) settle_delay: Duration,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl WriteWorker {
    /// Consume chunks until the chunk queue closes
    pub(crate) async fn run(mut self) {
        tracing::info!(base_dir = %self.base_dir.display(), "Write worker started");

        let mut state = WriterState::Idle;
        while let Some(chunk) = self.chunks.recv().await {
            state = match state {
                WriterState::Idle => self.on_idle(chunk).await,
                WriterState::FileOpen(open) => self.on_file_open(open, chunk).await,
                WriterState::ResyncDrain => {
                    if chunk.is_last() {
                        tracing::debug!("Resynchronized on end-of-file marker");
                        WriterState::Idle
                    } else {
                        WriterState::ResyncDrain
                    }
                }
            };
        }

        if let WriterState::FileOpen(open) = state {
            tracing::warn!(filename = %open.filename, bytes = open.written, "Chunk stream ended mid-file");
            self.close(open, TransferOutcome::Failed).await;
        }
        tracing::info!("Write worker stopped");
    }

    async fn on_idle(&self, chunk: ChunkBuffer) -> WriterState {
        if chunk.is_last() {
            if chunk.filename().is_empty() {
                tracing::warn!(
                    outcome = ?chunk.outcome(),
                    "Received end-of-file marker but no file was open"
                );
            } else {
                self.create_empty_file(chunk.filename()).await;
            }
            return WriterState::Idle;
        }

        if !chunk.starts_file() {
            let violation = TransferError::ProtocolViolation {
                reason: format!("{}-byte data chunk with no open file", chunk.len()),
            };
            tracing::error!(error = %violation, "Discarding orphan chunk and draining to next end-of-file marker");
            return WriterState::ResyncDrain;
        }

        match self.begin_file(chunk.filename()).await {
            Ok(open) => self.write_chunk(open, chunk).await,
            Err(e) => {
                self.skip(chunk.filename(), &e);
                WriterState::ResyncDrain
            }
        }
    }

    async fn on_file_open(&self, open: OpenFile, chunk: ChunkBuffer) -> WriterState {
        if chunk.starts_file() {
            // The previous file lost its marker; close it and start over
            tracing::error!(
                filename = %open.filename,
                next = %chunk.filename(),
                "Protocol violation: new file started before end-of-file marker"
            );
            self.close(open, TransferOutcome::Failed).await;
            return self.on_idle(chunk).await;
        }
        if chunk.is_last() && !chunk.filename().is_empty() {
            // A named marker is a zero-byte file, never the open file's marker
            tracing::error!(
                filename = %open.filename,
                next = %chunk.filename(),
                "Protocol violation: zero-byte file arrived before end-of-file marker"
            );
            self.close(open, TransferOutcome::Failed).await;
            return self.on_idle(chunk).await;
        }
        self.write_chunk(open, chunk).await
    }

    async fn write_chunk(&self, mut open: OpenFile, chunk: ChunkBuffer) -> WriterState {
        if !chunk.is_empty() {
            let requested = chunk.len();
            let failure = match open.file.write(chunk.payload()).await {
                Ok(written) if written == requested => None,
                Ok(written) => Some(TransferError::ShortWrite { written, requested }),
                Err(e) => Some(TransferError::Storage {
                    reason: e.to_string(),
                }),
            };

            if let Some(e) = failure {
                tracing::warn!(path = %open.path.display(), bytes = open.written, error = %e, "Write failed, abandoning file");
                let filename = open.filename.clone();
                if let Err(close_err) = open.file.close().await {
                    tracing::warn!(filename = %filename, error = %close_err, "Failed to close abandoned file");
                }
                self.skip(&filename, &e);
                return WriterState::ResyncDrain;
            }
            open.written += requested as u64;
        }

        match chunk.outcome() {
            Some(outcome) if chunk.is_last() => {
                self.close(open, outcome).await;
                WriterState::Idle
            }
            _ => WriterState::FileOpen(open),
        }
    }

    async fn begin_file(&self, filename: &FileName) -> Result<OpenFile, TransferError> {
        self.ensure_medium().await?;

        let path = self.base_dir.join(filename.as_str());
        let file = self
            .storage
            .open(&path)
            .await
            .map_err(|e| TransferError::Storage {
                reason: format!("failed to open {}: {e}", path.display()),
            })?;

        tracing::info!(path = %path.display(), "Opened file for writing");
        Ok(OpenFile {
            file,
            filename: filename.clone(),
            path,
            written: 0,
        })
    }

    async fn create_empty_file(&self, filename: &FileName) {
        match self.begin_file(filename).await {
            Ok(open) => self.close(open, TransferOutcome::Complete).await,
            Err(e) => self.skip(filename, &e),
        }
    }

    /// Check for the medium, trying one reinitialization if it is missing
    async fn ensure_medium(&self) -> Result<(), TransferError> {
        if self.storage.medium_present().await {
            return Ok(());
        }

        tracing::warn!("Storage medium not present, attempting reinitialization");
        if !self.storage.reinit().await {
            tracing::warn!("Storage reinitialization failed");
        }
        tokio::time::sleep(self.settle_delay).await;

        if self.storage.medium_present().await {
            tracing::info!("Storage medium back after reinitialization");
            Ok(())
        } else {
            Err(TransferError::StorageUnavailable)
        }
    }

    async fn close(&self, open: OpenFile, outcome: TransferOutcome) {
        let OpenFile {
            file,
            filename,
            path,
            written,
        } = open;

        if let Err(e) = file.close().await {
            let e = TransferError::Storage {
                reason: format!("failed to close {}: {e}", path.display()),
            };
            tracing::warn!(path = %path.display(), bytes = written, error = %e, "Close failed");
            self.skip(&filename, &e);
            return;
        }

        let complete = outcome == TransferOutcome::Complete;
        if complete {
            tracing::info!(path = %path.display(), bytes = written, "File closed");
        } else {
            tracing::warn!(path = %path.display(), bytes = written, "File closed after failed transfer, contents incomplete");
        }
        let _ = self.event_tx.send(Event::FileWritten {
            filename: filename.to_string(),
            bytes: written,
            complete,
        });
    }

    fn skip(&self, filename: &FileName, error: &TransferError) {
        tracing::warn!(filename = %filename, error = %error, error_code = error.error_code(), "Skipping file");
        let _ = self.event_tx.send(Event::FileSkipped {
            filename: filename.to_string(),
            error_code: error.error_code().to_string(),
            error: error.to_string(),
        });
    }
}
