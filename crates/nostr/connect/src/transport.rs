//! Transport seam between the RPC engine and a relay.

use std::sync::Arc;

use async_trait::async_trait;
use nostr::Event;
use nostr_client::{Filter, RelayConfig, RelayConnection};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::Result;

/// One logical relay channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel. Must be a no-op when already open.
    async fn connect(&self) -> Result<()>;

    async fn publish(&self, event: &Event) -> Result<()>;

    /// Open a subscription; matching events arrive on the returned receiver.
    async fn subscribe(&self, subscription_id: &str, filter: Filter) -> Result<mpsc::Receiver<Event>>;

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;

    /// Close the channel. Must be safe to call repeatedly.
    async fn close(&self) -> Result<()>;
}

/// Opens transport channels to a relay address.
pub trait Connector: Send + Sync {
    fn open(&self, relay_url: &str) -> Result<Arc<dyn Transport>>;
}

#[async_trait]
impl Transport for RelayConnection {
    async fn connect(&self) -> Result<()> {
        Ok(RelayConnection::connect(self).await?)
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        let confirmation = RelayConnection::publish(self, event).await?;
        trace!("relay accepted {}: {}", confirmation.event_id, confirmation.message);
        Ok(())
    }

    async fn subscribe(&self, subscription_id: &str, filter: Filter) -> Result<mpsc::Receiver<Event>> {
        Ok(self.subscribe_filter(subscription_id, filter).await?)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        Ok(RelayConnection::unsubscribe(self, subscription_id).await?)
    }

    async fn close(&self) -> Result<()> {
        Ok(self.disconnect().await?)
    }
}

/// Connector backed by real WebSocket relay connections.
#[derive(Debug, Clone, Default)]
pub struct RelayConnector {
    config: RelayConfig,
}

impl RelayConnector {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }
}

impl Connector for RelayConnector {
    fn open(&self, relay_url: &str) -> Result<Arc<dyn Transport>> {
        let connection = RelayConnection::with_config(relay_url, self.config.clone())?;
        Ok(Arc::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectError;
    use nostr_client::ClientError;

    #[test]
    fn relay_connector_rejects_non_websocket_addresses() {
        let connector = RelayConnector::default();
        assert!(matches!(
            connector.open("http://relay.example"),
            Err(ConnectError::Transport(ClientError::InvalidUrl(_)))
        ));
        assert!(connector.open("wss://relay.example").is_ok());
    }
}
