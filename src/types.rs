//! Core types for sample-dl

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, TransferError};

/// Largest payload a single chunk can carry
pub const CHUNK_CAPACITY: usize = 1024;

/// Storage capacity of a [`FileName`], including the terminator slot the
/// device format reserves; names are bounded to one byte less.
pub const FILENAME_CAPACITY: usize = 64;

/// A filename bounded to [`FILENAME_CAPACITY`]` - 1` bytes.
///
/// Longer input is cut at the last UTF-8 character boundary that fits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileName(String);

impl FileName {
    /// Bound `name` to the filename capacity
    pub fn new(name: &str) -> Self {
        let max = FILENAME_CAPACITY - 1;
        if name.len() <= max {
            return Self(name.to_string());
        }
        let mut end = max;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self(name[..end].to_string())
    }

    /// The empty filename carried by continuation chunks
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Whether no name is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a file's fetch ended, carried on its end-of-file marker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOutcome {
    /// Every expected byte was streamed
    Complete,
    /// The fetch stopped early; any bytes already sent are a prefix of the file
    Failed,
}

/// The unit of communication between the fetch and write workers.
///
/// A chunk is either a data chunk (1..=[`CHUNK_CAPACITY`] payload bytes,
/// never the last of its file) or an end-of-file marker (no payload,
/// `is_last`, tagged with a [`TransferOutcome`]). The two constructors are
/// the only way to build one, so payload and marker never share a record.
///
/// The filename is set only on the first data chunk of a file, or on the
/// marker of a zero-byte file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkBuffer {
    data: Bytes,
    is_last: bool,
    filename: FileName,
    outcome: Option<TransferOutcome>,
}

impl ChunkBuffer {
    /// Build a data chunk
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ProtocolViolation`] when the payload is empty
    /// or larger than [`CHUNK_CAPACITY`].
    pub fn data(payload: Bytes, filename: FileName) -> Result<Self> {
        if payload.is_empty() || payload.len() > CHUNK_CAPACITY {
            return Err(Error::Transfer(TransferError::ProtocolViolation {
                reason: format!(
                    "data chunk of {} bytes outside 1..={CHUNK_CAPACITY}",
                    payload.len()
                ),
            }));
        }
        Ok(Self {
            data: payload,
            is_last: false,
            filename,
            outcome: None,
        })
    }

    /// Build an end-of-file marker
    pub fn end_of_file(outcome: TransferOutcome, filename: FileName) -> Self {
        Self {
            data: Bytes::new(),
            is_last: true,
            filename,
            outcome: Some(outcome),
        }
    }

    /// Valid payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Number of valid payload bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the chunk carries no payload (true for every marker)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this chunk ends its file's sequence
    pub fn is_last(&self) -> bool {
        self.is_last
    }

    /// Filename tag, usually empty
    pub fn filename(&self) -> &FileName {
        &self.filename
    }

    /// Fetch outcome; `Some` only on end-of-file markers
    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.outcome
    }

    /// Whether this chunk opens a new file: a named data chunk
    pub fn starts_file(&self) -> bool {
        !self.is_last && !self.filename.is_empty()
    }
}

/// A remote file reference waiting in the URL queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRequest {
    url: String,
    key: String,
}

impl UrlRequest {
    /// Validate and build a request
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] when either part is empty or the URL
    /// is longer than `max_url_len` bytes.
    pub fn new(url: impl Into<String>, key: impl Into<String>, max_url_len: usize) -> Result<Self> {
        let url = url.into();
        let key = key.into();
        if url.is_empty() {
            return Err(Error::InvalidRequest("url is empty".into()));
        }
        if key.is_empty() {
            return Err(Error::InvalidRequest("key is empty".into()));
        }
        if url.len() > max_url_len {
            return Err(Error::InvalidRequest(format!(
                "url is {} bytes, limit is {max_url_len}",
                url.len()
            )));
        }
        Ok(Self { url, key })
    }

    /// The URL to fetch
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The storage key the URL was issued for
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Events emitted by the pipeline
///
/// Subscribe with [`Pipeline::subscribe`](crate::Pipeline::subscribe).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A request entered the URL queue
    Queued {
        /// Storage key of the request
        key: String,
    },

    /// Streaming progress for the file being fetched
    Downloading {
        /// Sequence number of the fetch attempt, starting at 1
        file_number: u32,
        /// Target filename
        filename: String,
        /// Whole percent of the expected length received
        percent: u8,
    },

    /// The fetch worker streamed every byte of a file
    FetchComplete {
        /// Sequence number of the fetch attempt
        file_number: u32,
        /// Target filename
        filename: String,
        /// Bytes streamed
        bytes: u64,
    },

    /// The fetch worker gave up on a file
    FetchFailed {
        /// Sequence number of the fetch attempt
        file_number: u32,
        /// Target filename
        filename: String,
        /// Bytes streamed before the failure
        bytes: u64,
        /// Machine-readable error code
        error_code: String,
        /// Error message
        error: String,
    },

    /// The write worker closed a file on the medium
    FileWritten {
        /// Filename under the base directory
        filename: String,
        /// Bytes written
        bytes: u64,
        /// False when the fetch failed and the file holds a prefix only
        complete: bool,
    },

    /// The write worker skipped or abandoned a file
    FileSkipped {
        /// Filename under the base directory
        filename: String,
        /// Machine-readable error code
        error_code: String,
        /// Error message
        error: String,
    },

    /// The pipeline stopped
    Shutdown,
}
