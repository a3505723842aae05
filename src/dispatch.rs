//! Routing of inbound pub/sub messages.
//!
//! The broker session itself lives outside this crate; whatever receives a
//! message hands its topic and payload to [`Dispatcher::handle_message`].

use serde::Deserialize;

use crate::config::DeviceConfig;
use crate::device::DeviceStateWriter;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::registration::LinkChecker;

/// One file to fetch, as carried in a batch message
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct BatchEntry {
    /// Presigned HTTPS URL
    pub url: String,
    /// Object key, used for logging only
    pub key: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchPayload {
    Wrapped { files: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

#[derive(Deserialize)]
struct RegistrationStatus {
    registered: bool,
}

/// Parse a batch message into its entries, in message order.
///
/// Entries missing a `url` or `key` are reported as `Err` in place so the
/// caller can count them; the rest of the batch is unaffected.
///
/// # Errors
///
/// Returns [`Error::InvalidBatch`] when the payload is not a batch at all.
pub fn parse_batch(payload: &[u8]) -> Result<Vec<Result<BatchEntry>>> {
    let values = match serde_json::from_slice::<BatchPayload>(payload) {
        Ok(BatchPayload::Wrapped { files }) | Ok(BatchPayload::Bare(files)) => files,
        Err(e) => return Err(Error::InvalidBatch(e.to_string())),
    };

    Ok(values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value::<BatchEntry>(value)
                .map_err(|e| Error::InvalidBatch(format!("entry {index}: {e}")))
        })
        .collect())
}

/// What a message did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Registration answer recorded
    RegistrationStatus(bool),
    /// File batch submitted to the pipeline
    Batch {
        /// Entries accepted into the URL queue
        accepted: usize,
        /// Entries that were malformed or refused by the queue
        rejected: usize,
    },
    /// Unknown topic or unreadable payload
    Ignored,
}

/// Routes messages to the device state or the pipeline
pub struct Dispatcher {
    pipeline: Pipeline,
    state: DeviceStateWriter,
    device_id: String,
    registration_status_topic: String,
    batch_topic: String,
}

impl Dispatcher {
    /// Create a dispatcher owning the device state's only writer
    pub fn new(pipeline: Pipeline, state: DeviceStateWriter, device: &DeviceConfig) -> Self {
        Self {
            pipeline,
            state,
            device_id: device.device_id.clone(),
            registration_status_topic: device.registration_status_topic.clone(),
            batch_topic: device.batch_topic(),
        }
    }

    /// Topics this dispatcher expects to be subscribed to
    pub fn topics(&self) -> [&str; 2] {
        [self.registration_status_topic.as_str(), self.batch_topic.as_str()]
    }

    /// Record whether the device is paired with an account
    pub fn record_link_status(&self, linked: bool) {
        self.state.set_linked(linked);
    }

    /// Ask the backend whether this device is paired and record the answer.
    ///
    /// # Errors
    ///
    /// Transport and parse failures are returned and leave the state untouched.
    pub async fn refresh_link_status(&self, checker: &LinkChecker) -> Result<bool> {
        let linked = checker.is_linked(&self.device_id).await.inspect_err(|e| {
            tracing::warn!(device_id = %self.device_id, error = %e, "Link check failed");
        })?;
        self.record_link_status(linked);
        Ok(linked)
    }

    /// Handle one inbound message
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Dispatch {
        if topic == self.registration_status_topic {
            return self.on_registration_status(payload);
        }
        if topic == self.batch_topic {
            return self.on_batch(payload).await;
        }

        tracing::debug!(topic, bytes = payload.len(), "Ignoring message on unhandled topic");
        Dispatch::Ignored
    }

    fn on_registration_status(&self, payload: &[u8]) -> Dispatch {
        match serde_json::from_slice::<RegistrationStatus>(payload) {
            Ok(status) => {
                self.state.set_registered(status.registered);
                Dispatch::RegistrationStatus(status.registered)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable registration status message");
                Dispatch::Ignored
            }
        }
    }

    async fn on_batch(&self, payload: &[u8]) -> Dispatch {
        let entries = match parse_batch(payload) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding batch message");
                return Dispatch::Ignored;
            }
        };
        tracing::info!(entries = entries.len(), "Received file batch");

        let mut accepted = 0;
        let mut rejected = 0;
        for entry in entries {
            let result = match entry {
                Ok(entry) => self.pipeline.submit(&entry.url, &entry.key).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => accepted += 1,
                Err(e) => {
                    tracing::warn!(error = %e, error_code = e.error_code(), "Batch entry rejected");
                    rejected += 1;
                }
            }
        }

        tracing::info!(accepted, rejected, "File batch dispatched");
        Dispatch::Batch { accepted, rejected }
    }
}
