//! Change-feed publisher
//!
//! A single broadcast stream per storage instance. Subscribers receive every
//! bulk published after they subscribed; no backlog is retained. Closing the
//! publisher drops the sender so every receiver observes end-of-stream.

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{Result, StorageError};
use crate::event::EventBulk;

/// Buffered bulks per lagging subscriber before it starts missing events
const CHANNEL_CAPACITY: usize = 1024;

/// Broadcast fan-out of [`EventBulk`] values
pub struct ChangePublisher {
    label: String,
    sender: Mutex<Option<broadcast::Sender<EventBulk>>>,
}

impl ChangePublisher {
    /// Create an open publisher; `label` names the owning instance in errors
    pub fn new(label: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            label: label.into(),
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Subscribe to bulks published from now on
    pub fn subscribe(&self) -> Result<broadcast::Receiver<EventBulk>> {
        match self.sender.lock().as_ref() {
            Some(sender) => Ok(sender.subscribe()),
            None => Err(StorageError::Closed(self.label.clone())),
        }
    }

    /// Publish a bulk to all current subscribers
    ///
    /// A send without subscribers is not an error; publication after close
    /// is silently dropped, matching the undefined-result contract for
    /// callers racing a close.
    pub fn publish(&self, bulk: EventBulk) {
        if let Some(sender) = self.sender.lock().as_ref() {
            trace!(bulk_id = %bulk.id, events = bulk.len(), "publishing event bulk");
            let _ = sender.send(bulk);
        }
    }

    /// Complete the stream. Idempotent.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// Whether the stream has been completed
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_published_bulks() {
        let publisher = ChangePublisher::new("db/users");
        let mut rx = publisher.subscribe().unwrap();

        publisher.publish(EventBulk::new(Vec::new()));
        let bulk = rx.recv().await.unwrap();
        assert!(bulk.is_empty());
    }

    #[tokio::test]
    async fn test_close_completes_stream() {
        let publisher = ChangePublisher::new("db/users");
        let mut rx = publisher.subscribe().unwrap();

        publisher.close();
        publisher.close();
        assert!(publisher.is_closed());
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(publisher.subscribe().is_err());
    }

    #[tokio::test]
    async fn test_no_backlog_for_late_subscribers() {
        let publisher = ChangePublisher::new("db/users");
        publisher.publish(EventBulk::new(Vec::new()));

        let mut rx = publisher.subscribe().unwrap();
        publisher.close();
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
