//! In-process relay for loopback setups and tests.
//!
//! Every channel opened from one [`MemoryRelay`] shares the same bus. Published events
//! fan out to the live subscriptions whose filter matches; nothing is replayed. Published
//! events are only counted unless the relay was built with [`MemoryRelay::recording`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use nostr::Event;
use nostr_client::{ClientError, Filter, SUBSCRIPTION_CHANNEL_CAPACITY};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

use crate::error::Result;
use crate::transport::{Connector, Transport};

#[derive(Clone, Default)]
pub struct MemoryRelay {
    bus: Arc<Bus>,
}

#[derive(Default)]
struct Bus {
    subscribers: Mutex<Vec<Subscriber>>,
    published: AtomicUsize,
    record: bool,
    recorded: Mutex<Vec<Event>>,
    opened: AtomicUsize,
    next_channel: AtomicU64,
    fail_publishes: AtomicBool,
}

struct Subscriber {
    channel: u64,
    subscription_id: String,
    filter: Filter,
    sender: mpsc::Sender<Event>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relay that also keeps a copy of every accepted event for [`Self::published_events`].
    pub fn recording() -> Self {
        Self {
            bus: Arc::new(Bus {
                record: true,
                ..Bus::default()
            }),
        }
    }

    /// Number of channels opened through [`Connector::open`].
    pub fn opened_channels(&self) -> usize {
        self.bus.opened.load(Ordering::SeqCst)
    }

    /// Number of events accepted by the bus.
    pub fn published_count(&self) -> usize {
        self.bus.published.load(Ordering::SeqCst)
    }

    /// Events accepted so far. Always empty unless built with [`Self::recording`].
    pub async fn published_events(&self) -> Vec<Event> {
        self.bus.recorded.lock().await.clone()
    }

    /// Number of live subscriptions across all channels.
    pub async fn subscription_count(&self) -> usize {
        self.bus.subscribers.lock().await.len()
    }

    /// Make every subsequent publish fail as a relay rejection.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.bus.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event to matching subscriptions without going through a channel.
    pub async fn inject(&self, event: Event) {
        self.bus.fan_out(event).await;
    }
}

impl Bus {
    async fn fan_out(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());
        for subscriber in subscribers.iter() {
            if !subscriber.filter.matches(&event) {
                continue;
            }
            if let Err(error) = subscriber.sender.try_send(event.clone()) {
                debug!(
                    "memory relay dropped event {} for {}: {}",
                    event.id, subscriber.subscription_id, error
                );
            }
        }
    }
}

impl Connector for MemoryRelay {
    fn open(&self, relay_url: &str) -> Result<Arc<dyn Transport>> {
        self.bus.opened.fetch_add(1, Ordering::SeqCst);
        let id = self.bus.next_channel.fetch_add(1, Ordering::SeqCst);
        trace!("memory relay opened channel {} for {}", id, relay_url);
        Ok(Arc::new(MemoryChannel {
            bus: Arc::clone(&self.bus),
            id,
            connected: AtomicBool::new(false),
        }))
    }
}

/// One channel onto a [`MemoryRelay`] bus.
pub struct MemoryChannel {
    bus: Arc<Bus>,
    id: u64,
    connected: AtomicBool,
}

impl MemoryChannel {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::NotConnected.into())
        }
    }
}

#[async_trait]
impl Transport for MemoryChannel {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        self.ensure_connected()?;
        if self.bus.fail_publishes.load(Ordering::SeqCst) {
            return Err(ClientError::PublishRejected {
                event_id: event.id.clone(),
                message: "blocked: publishing disabled".to_string(),
            }
            .into());
        }
        self.bus.published.fetch_add(1, Ordering::SeqCst);
        if self.bus.record {
            self.bus.recorded.lock().await.push(event.clone());
        }
        self.bus.fan_out(event.clone()).await;
        Ok(())
    }

    async fn subscribe(&self, subscription_id: &str, filter: Filter) -> Result<mpsc::Receiver<Event>> {
        self.ensure_connected()?;
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        self.bus.subscribers.lock().await.push(Subscriber {
            channel: self.id,
            subscription_id: subscription_id.to_string(),
            filter,
            sender,
        });
        Ok(receiver)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.bus.subscribers.lock().await.retain(|subscriber| {
            !(subscriber.channel == self.id && subscriber.subscription_id == subscription_id)
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.bus
            .subscribers
            .lock()
            .await
            .retain(|subscriber| subscriber.channel != self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectError;

    fn event(pubkey: &str, p: &str) -> Event {
        Event {
            id: format!("{pubkey}-{p}"),
            pubkey: pubkey.to_string(),
            created_at: 10,
            kind: 24133,
            tags: vec![vec!["p".to_string(), p.to_string()]],
            content: String::new(),
            sig: String::new(),
        }
    }

    #[tokio::test]
    async fn fans_out_to_matching_subscriptions_only() -> Result<()> {
        let relay = MemoryRelay::new();
        let publisher = relay.open("memory://")?;
        let listener = relay.open("memory://")?;
        publisher.connect().await?;
        listener.connect().await?;

        let mut for_bob = listener.subscribe("bob", Filter::new().pubkey("bob")).await?;
        let mut for_carol = listener.subscribe("carol", Filter::new().pubkey("carol")).await?;

        publisher.publish(&event("alice", "bob")).await?;
        assert_eq!(for_bob.recv().await.map(|event| event.id), Some("alice-bob".to_string()));
        assert!(for_carol.try_recv().is_err());
        assert_eq!(relay.opened_channels(), 2);
        assert_eq!(relay.published_count(), 1);
        assert!(relay.published_events().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn recording_relay_keeps_accepted_events() -> Result<()> {
        let relay = MemoryRelay::recording();
        let channel = relay.open("memory://")?;
        channel.connect().await?;

        channel.publish(&event("alice", "bob")).await?;
        channel.publish(&event("alice", "carol")).await?;
        let ids: Vec<String> = relay.published_events().await.into_iter().map(|event| event.id).collect();
        assert_eq!(ids, vec!["alice-bob".to_string(), "alice-carol".to_string()]);
        assert_eq!(relay.published_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn close_ends_streams_and_is_idempotent() -> Result<()> {
        let relay = MemoryRelay::new();
        let channel = relay.open("memory://")?;
        channel.connect().await?;
        let mut events = channel.subscribe("sub", Filter::new()).await?;

        channel.close().await?;
        channel.close().await?;
        assert!(events.recv().await.is_none());
        assert_eq!(relay.subscription_count().await, 0);
        assert!(matches!(
            channel.publish(&event("alice", "bob")).await,
            Err(ConnectError::Transport(ClientError::NotConnected))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn failing_publishes_are_rejected() -> Result<()> {
        let relay = MemoryRelay::new();
        let channel = relay.open("memory://")?;
        channel.connect().await?;
        relay.set_fail_publishes(true);

        assert!(matches!(
            channel.publish(&event("alice", "bob")).await,
            Err(ConnectError::Transport(ClientError::PublishRejected { .. }))
        ));
        assert_eq!(relay.published_count(), 0);
        Ok(())
    }
}
