//! Device-wide registration and link state.
//!
//! One writer (the message dispatcher) and any number of readers (startup,
//! display). Readers wait for changes instead of polling.

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Snapshot of the device's pairing state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Whether the backend has answered the registration query yet
    pub registration_known: bool,
    /// Backend answer to the registration query
    pub registered: bool,
    /// Whether the device is paired with a user account
    pub linked: bool,
}

/// Create the shared state with its single writer
pub fn device_state() -> (DeviceStateWriter, DeviceStateReader) {
    let (tx, rx) = watch::channel(DeviceStatus::default());
    (DeviceStateWriter { tx }, DeviceStateReader { rx })
}

/// The only handle that can change the device state
#[derive(Debug)]
pub struct DeviceStateWriter {
    tx: watch::Sender<DeviceStatus>,
}

impl DeviceStateWriter {
    /// Record the backend's registration answer
    pub fn set_registered(&self, registered: bool) {
        self.tx.send_modify(|status| {
            status.registration_known = true;
            status.registered = registered;
        });
        tracing::info!(registered, "Device registration status updated");
    }

    /// Record whether the device is paired
    pub fn set_linked(&self, linked: bool) {
        self.tx.send_modify(|status| status.linked = linked);
        tracing::info!(linked, "Device link status updated");
    }

    /// A new reader of this state
    pub fn reader(&self) -> DeviceStateReader {
        DeviceStateReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of the device state
#[derive(Clone, Debug)]
pub struct DeviceStateReader {
    rx: watch::Receiver<DeviceStatus>,
}

impl DeviceStateReader {
    /// Current state
    pub fn snapshot(&self) -> DeviceStatus {
        *self.rx.borrow()
    }

    /// Wait until the registration answer has arrived and return it
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if the writer is dropped first.
    pub async fn wait_for_registration(&mut self) -> Result<bool> {
        let status = self
            .rx
            .wait_for(|status| status.registration_known)
            .await
            .map_err(|_| Error::ShuttingDown)?;
        Ok(status.registered)
    }

    /// Wait until the device is linked
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if the writer is dropped first.
    pub async fn wait_for_link(&mut self) -> Result<()> {
        self.rx
            .wait_for(|status| status.linked)
            .await
            .map_err(|_| Error::ShuttingDown)?;
        Ok(())
    }
}
