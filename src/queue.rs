//! Bounded FIFO queues between the pipeline stages.
//!
//! A thin typed layer over [`tokio::sync::mpsc`] bounded channels that fixes
//! a send timeout per queue. Senders wait at most that long for space and
//! then fail with [`TransferError::QueueFull`]; the receiver waits
//! indefinitely and sees `None` only once every sender is gone.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::error::{Error, Result, TransferError};

/// Create a queue holding at most `capacity` items
pub fn bounded<T>(
    name: &'static str,
    capacity: usize,
    send_timeout: Duration,
) -> (BoundedQueue<T>, QueueReceiver<T>) {
    // mpsc panics on a zero capacity; Config::validate rejects it earlier
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BoundedQueue {
            name,
            tx,
            send_timeout,
        },
        QueueReceiver { rx },
    )
}

/// Producer side of a bounded queue (cloneable, multiple producers)
pub struct BoundedQueue<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    send_timeout: Duration,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            send_timeout: self.send_timeout,
        }
    }
}

impl<T> BoundedQueue<T> {
    /// Enqueue `item`, waiting up to the queue's send timeout for space
    ///
    /// # Errors
    ///
    /// - [`TransferError::QueueFull`] if no slot freed up in time; the item is dropped
    /// - [`Error::ShuttingDown`] if the consumer is gone
    pub async fn send(&self, item: T) -> Result<()> {
        match self.tx.send_timeout(item, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(Error::Transfer(TransferError::QueueFull {
                queue: self.name,
                timeout: self.send_timeout,
            })),
            Err(SendTimeoutError::Closed(_)) => Err(Error::ShuttingDown),
        }
    }

    /// Queue name used in logs and errors
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Maximum number of items the queue holds
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Items currently waiting in the queue
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer side of a bounded queue (single consumer)
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Dequeue the next item, waiting as long as it takes.
    ///
    /// Returns `None` once every sender has been dropped and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}
