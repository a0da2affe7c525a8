//! Delivery acknowledgments.
//!
//! After a message lands in the mailbox the receiver publishes an empty
//! document under `ack base key + "ack-" + id`. The sender polls for it to
//! stop resending; the engine only hands the key over and never waits.

mod procrastinator;

use tokio::sync::mpsc::UnboundedSender;

pub use procrastinator::{AckConfig, AckProcrastinator};

/// Prefix placed between the ack base key and the message id.
pub const ACK_PREFIX: &str = "ack-";

/// Key under which the acknowledgment for `id` is published.
pub fn ack_key(base: &str, id: u64) -> String {
    format!("{base}{ACK_PREFIX}{id}")
}

/// Queues acknowledgments for best-effort delivery.
pub trait AckScheduler: Send + Sync {
    /// Queue an acknowledgment to be published at `key`.
    fn schedule(&self, key: String);
}

impl AckScheduler for UnboundedSender<String> {
    fn schedule(&self, key: String) {
        if self.send(key).is_err() {
            tracing::warn!("Acknowledgment receiver dropped; ack discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_key_layout() {
        assert_eq!(ack_key("SSK@ack/", 42), "SSK@ack/ack-42");
    }

    #[tokio::test]
    async fn test_sender_scheduler_forwards_keys() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.schedule("SSK@ack/ack-1".to_string());
        assert_eq!(rx.recv().await.as_deref(), Some("SSK@ack/ack-1"));
    }
}
