//! Subscription management for receiving filtered events.

use crate::error::{ClientError, Result};
use crate::filter::Filter;
use nostr::Event;
use tokio::sync::mpsc;

/// Capacity of the per-subscription event channel.
pub const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 1000;

/// A subscription to filtered events from a relay.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Subscription ID.
    pub id: String,
    /// Filters for this subscription.
    pub filters: Vec<Filter>,
    event_tx: mpsc::Sender<Event>,
}

impl Subscription {
    /// Create a subscription that receives events on a bounded channel.
    pub fn with_channel(id: impl Into<String>, filters: Vec<Filter>) -> (Self, mpsc::Receiver<Event>) {
        let (event_tx, event_rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        let subscription = Self {
            id: id.into(),
            filters,
            event_tx,
        };
        (subscription, event_rx)
    }

    /// Forward a received event to the consumer.
    pub fn deliver(&self, event: Event) -> Result<()> {
        self.event_tx.try_send(event).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => {
                ClientError::Subscription("event channel full - consumer too slow".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ClientError::Subscription("event channel closed".to_string())
            }
        })
    }

    /// True once the consumer dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            id: "id".to_string(),
            pubkey: "pubkey".to_string(),
            created_at: 1,
            kind: 24133,
            tags: vec![],
            content: "ciphertext".to_string(),
            sig: "sig".to_string(),
        }
    }

    #[tokio::test]
    async fn delivered_events_reach_receiver() -> Result<()> {
        let (subscription, mut rx) = Subscription::with_channel("sub", vec![Filter::new()]);
        subscription.deliver(sample_event())?;

        let received = rx.recv().await;
        assert_eq!(received.map(|event| event.content), Some("ciphertext".to_string()));
        Ok(())
    }

    #[test]
    fn delivery_after_receiver_drop_fails() {
        let (subscription, rx) = Subscription::with_channel("sub", vec![]);
        drop(rx);
        assert!(subscription.is_closed());
        assert!(matches!(
            subscription.deliver(sample_event()),
            Err(ClientError::Subscription(message)) if message.contains("closed")
        ));
    }
}
