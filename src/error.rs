//! Error types for sample-dl
//!
//! Two layers:
//! - [`Error`] is the crate-wide error returned by public operations
//!   (configuration, submission, collaborator construction).
//! - [`TransferError`] classifies per-file transfer failures. These never
//!   escape the worker that detects them; they are logged, attached to
//!   events, and degrade to "this file did not transfer".

use std::time::Duration;
use thiserror::Error;

/// Result type alias for sample-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sample-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_size")
        key: Option<String>,
    },

    /// A file transfer step failed
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error outside of a file transfer (client setup, link check)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A download request was rejected before it reached the queue
    #[error("invalid download request: {0}")]
    InvalidRequest(String),

    /// An inbound batch message could not be understood
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// The pipeline has not been started yet
    #[error("pipeline not initialized")]
    NotInitialized,

    /// The pipeline is shutting down or has stopped
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,
}

/// Per-file transfer failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// A bounded queue stayed full for the whole send timeout
    #[error("{queue} queue full after {timeout:?}")]
    QueueFull {
        /// Which queue rejected the item ("url" or "chunk")
        queue: &'static str,
        /// How long the sender waited
        timeout: Duration,
    },

    /// Connection, TLS, or mid-stream failure
    #[error("network failure: {reason}")]
    Network {
        /// What went wrong
        reason: String,
    },

    /// The server answered with a non-2xx status
    #[error("server responded with HTTP {status}")]
    HttpStatus {
        /// The HTTP status code
        status: u16,
    },

    /// The storage medium is absent even after a reinitialization attempt
    #[error("storage medium unavailable")]
    StorageUnavailable,

    /// The storage layer failed to open or write a file
    #[error("storage failure: {reason}")]
    Storage {
        /// What went wrong
        reason: String,
    },

    /// The storage layer accepted fewer bytes than requested
    #[error("short write: wrote {written} of {requested} bytes")]
    ShortWrite {
        /// Bytes actually written
        written: usize,
        /// Bytes requested
        requested: usize,
    },

    /// The chunk stream broke its framing rules
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// Which rule was broken
        reason: String,
    },
}

impl TransferError {
    /// Machine-readable error code, stable across releases
    pub fn error_code(&self) -> &'static str {
        match self {
            TransferError::QueueFull { .. } => "queue_full",
            TransferError::Network { .. } => "network_error",
            TransferError::HttpStatus { .. } => "http_status",
            TransferError::StorageUnavailable => "storage_unavailable",
            TransferError::Storage { .. } => "storage_error",
            TransferError::ShortWrite { .. } => "short_write",
            TransferError::ProtocolViolation { .. } => "protocol_violation",
        }
    }

    /// Whether the failure originated on the storage side of the pipeline
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            TransferError::StorageUnavailable
                | TransferError::Storage { .. }
                | TransferError::ShortWrite { .. }
        )
    }
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Transfer(e) => e.error_code(),
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::InvalidBatch(_) => "invalid_batch",
            Error::NotInitialized => "not_initialized",
            Error::ShuttingDown => "shutting_down",
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_errors_have_distinct_codes() {
        let variants = [
            TransferError::QueueFull {
                queue: "url",
                timeout: Duration::from_millis(100),
            },
            TransferError::Network {
                reason: "reset".into(),
            },
            TransferError::HttpStatus { status: 403 },
            TransferError::StorageUnavailable,
            TransferError::Storage {
                reason: "read-only".into(),
            },
            TransferError::ShortWrite {
                written: 10,
                requested: 20,
            },
            TransferError::ProtocolViolation {
                reason: "orphan".into(),
            },
        ];

        let mut codes: Vec<_> = variants.iter().map(TransferError::error_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), variants.len());
    }

    #[test]
    fn storage_classification() {
        assert!(TransferError::StorageUnavailable.is_storage());
        assert!(
            TransferError::ShortWrite {
                written: 0,
                requested: 1
            }
            .is_storage()
        );
        assert!(!TransferError::HttpStatus { status: 500 }.is_storage());
    }

    #[test]
    fn wrapped_transfer_error_keeps_its_code() {
        let err: Error = TransferError::StorageUnavailable.into();
        assert_eq!(err.error_code(), "storage_unavailable");
        assert_eq!(
            err.to_string(),
            "transfer error: storage medium unavailable"
        );
    }

    #[test]
    fn queue_full_message_names_the_queue() {
        let err = TransferError::QueueFull {
            queue: "chunk",
            timeout: Duration::from_millis(5000),
        };
        assert_eq!(err.to_string(), "chunk queue full after 5s");
    }

    #[test]
    fn config_error_carries_key() {
        match Error::config("chunk_size", "must be positive") {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("chunk_size"));
                assert_eq!(message, "must be positive");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
