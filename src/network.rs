//! Network collaborator: streaming HTTPS fetches.
//!
//! The fetch worker only sees the [`ContentSource`] / [`ContentStream`] pair,
//! so tests can script responses without a server. [`HttpsSource`] is the
//! production implementation on top of `reqwest`, trusting only the
//! deployment's trust anchor when one is configured.

use bytes::Bytes;
use tokio::sync::watch;

use crate::config::NetworkConfig;
use crate::error::{Result, TransferError};

/// Opens byte streams for URLs
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    /// Whether the network link is up. When it is down the fetch worker
    /// skips the request without attempting a connection. Sources with no
    /// view of the link report it as up.
    fn link_up(&self) -> bool {
        true
    }

    /// Connect and request `url`.
    ///
    /// Fails with [`TransferError::Network`] for connection or TLS failures
    /// and [`TransferError::HttpStatus`] for any non-2xx answer.
    async fn open_stream(
        &self,
        url: &str,
    ) -> std::result::Result<Box<dyn ContentStream>, TransferError>;
}

/// An open response body
#[async_trait::async_trait]
pub trait ContentStream: Send {
    /// Declared body length, `None` when the server did not send one
    fn content_length(&self) -> Option<u64>;

    /// Read between 1 and `max_len` bytes.
    ///
    /// Returns `Ok(None)` at end of data.
    async fn read_chunk(
        &mut self,
        max_len: usize,
    ) -> std::result::Result<Option<Bytes>, TransferError>;
}

/// HTTPS [`ContentSource`] backed by a `reqwest` client
#[derive(Clone)]
pub struct HttpsSource {
    client: reqwest::Client,
    link: Option<watch::Receiver<bool>>,
}

impl HttpsSource {
    /// Build a client from the network settings.
    ///
    /// # Errors
    ///
    /// Fails when the trust anchor file cannot be read or parsed, or the
    /// client cannot be built.
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .https_only(config.https_only)
            .connect_timeout(config.connect_timeout);

        if let Some(path) = &config.trust_anchor {
            let pem = std::fs::read(path)?;
            let anchor = reqwest::Certificate::from_pem(&pem)?;
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(anchor);
            tracing::info!(trust_anchor = %path.display(), "Pinned TLS trust anchor");
        }

        Ok(Self {
            client: builder.build()?,
            link: None,
        })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client, link: None }
    }

    /// Follow the link state published by the connectivity manager.
    ///
    /// Once the publisher is gone the last published value sticks.
    pub fn with_link_state(mut self, link: watch::Receiver<bool>) -> Self {
        self.link = Some(link);
        self
    }
}

#[async_trait::async_trait]
impl ContentSource for HttpsSource {
    fn link_up(&self) -> bool {
        self.link.as_ref().is_none_or(|link| *link.borrow())
    }

    async fn open_stream(
        &self,
        url: &str,
    ) -> std::result::Result<Box<dyn ContentStream>, TransferError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransferError::Network {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            // The body usually names the reason (expired signature, missing key)
            if let Ok(body) = response.text().await {
                tracing::debug!(status = status.as_u16(), body = %body, "HTTP error body");
            }
            return Err(TransferError::HttpStatus {
                status: status.as_u16(),
            });
        }

        Ok(Box::new(HttpsStream {
            content_length: response.content_length(),
            response,
            pending: Bytes::new(),
        }))
    }
}

/// Response body of an [`HttpsSource`] request, re-sliced to the caller's chunk size
struct HttpsStream {
    response: reqwest::Response,
    content_length: Option<u64>,
    pending: Bytes,
}

#[async_trait::async_trait]
impl ContentStream for HttpsStream {
    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    async fn read_chunk(
        &mut self,
        max_len: usize,
    ) -> std::result::Result<Option<Bytes>, TransferError> {
        while self.pending.is_empty() {
            match self.response.chunk().await {
                Ok(Some(bytes)) => self.pending = bytes,
                Ok(None) => return Ok(None),
                Err(e) => {
                    return Err(TransferError::Network {
                        reason: e.to_string(),
                    });
                }
            }
        }

        let take = max_len.max(1).min(self.pending.len());
        Ok(Some(self.pending.split_to(take)))
    }
}
