//! Single relay connection management.

use crate::error::{ClientError, Result};
use crate::filter::Filter;
use crate::subscription::Subscription;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use nostr::Event;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type PendingAcks = Arc<Mutex<HashMap<String, oneshot::Sender<(bool, String)>>>>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Relay message received from a relay.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event(String, Event),
    Ok(String, bool, String),
    Eose(String),
    Notice(String),
    Auth(String),
}

/// Publish confirmation from a relay.
#[derive(Debug, Clone)]
pub struct PublishConfirmation {
    pub event_id: String,
    pub message: String,
}

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    /// How long `publish` waits for the relay's `OK`.
    pub publish_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

/// Relay connection.
pub struct RelayConnection {
    url: Url,
    config: RelayConfig,
    state: Arc<RwLock<ConnectionState>>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    subscriptions: Arc<Mutex<HashMap<String, Subscription>>>,
    pending_acks: PendingAcks,
    recv_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl RelayConnection {
    /// Create a new relay connection with default config.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config.
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let parsed_url = Url::parse(url)?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed_url.scheme()
            )));
        }

        Ok(Self {
            url: parsed_url,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            pending_acks: Arc::new(Mutex::new(HashMap::new())),
            recv_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Relay URL as string.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Connect to relay and start background receive loop. Connecting an open connection is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let mut state_guard = self.state.write().await;
        if *state_guard == ConnectionState::Connected {
            return Ok(());
        }
        *state_guard = ConnectionState::Connecting;
        drop(state_guard);

        let connect_result = match timeout(
            self.config.connect_timeout,
            connect_async(self.url.as_str()),
        )
        .await
        {
            Ok(Ok(connected)) => connected,
            Ok(Err(error)) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::WebSocket(error.to_string()));
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::Timeout(format!(
                    "connection timeout after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let (stream, _response) = connect_result;
        let (writer, mut reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.state.write().await = ConnectionState::Connected;
        debug!("connected to relay {}", self.url);

        let subscriptions = Arc::clone(&self.subscriptions);
        let pending_acks = Arc::clone(&self.pending_acks);
        let state = Arc::clone(&self.state);
        let relay_url = self.url.to_string();

        let task = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match parse_relay_message(text.as_str()) {
                        Ok(Some(message)) => {
                            route_message(message, &subscriptions, &pending_acks, &relay_url).await;
                        }
                        Ok(None) => {}
                        Err(error) => {
                            warn!("protocol parse error on {}: {}", relay_url, error);
                        }
                    },
                    Ok(Message::Ping(payload)) => {
                        debug!("received ping from {} ({} bytes)", relay_url, payload.len());
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
                    Err(error) => {
                        warn!("websocket read error on {}: {}", relay_url, error);
                        break;
                    }
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            // Dropping the senders ends every consumer's stream.
            subscriptions.lock().await.clear();
            pending_acks.lock().await.clear();
            debug!("relay receive loop ended for {}", relay_url);
        });

        *self.recv_task.lock().await = Some(task);
        Ok(())
    }

    /// Disconnect from relay and stop background tasks. Safe to call repeatedly.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take()
            && let Err(error) = writer.send(Message::Close(None)).await
        {
            debug!("close frame to {} failed: {}", self.url, error);
        }

        if let Some(task) = self.recv_task.lock().await.take() {
            task.abort();
        }

        self.subscriptions.lock().await.clear();
        self.pending_acks.lock().await.clear();
        *self.state.write().await = ConnectionState::Disconnected;
        Ok(())
    }

    /// Publish event to relay and wait for its `OK`.
    pub async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending_acks
            .lock()
            .await
            .insert(event.id.clone(), ack_tx);

        if let Err(error) = self.send_json(&json!(["EVENT", event])).await {
            self.pending_acks.lock().await.remove(&event.id);
            return Err(error);
        }

        let ack = timeout(self.config.publish_timeout, ack_rx).await;
        self.pending_acks.lock().await.remove(&event.id);
        match ack {
            Ok(Ok((true, message))) => Ok(PublishConfirmation {
                event_id: event.id.clone(),
                message,
            }),
            Ok(Ok((false, message))) => Err(ClientError::PublishRejected {
                event_id: event.id.clone(),
                message,
            }),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => Err(ClientError::Timeout(format!(
                "no OK for event {} after {:?}",
                event.id, self.config.publish_timeout
            ))),
        }
    }

    /// Register and send subscription request.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<()> {
        let mut request = vec![json!("REQ"), json!(subscription.id)];
        for filter in &subscription.filters {
            request.push(serde_json::to_value(filter)?);
        }
        let request = Value::Array(request);
        self.subscriptions
            .lock()
            .await
            .insert(subscription.id.clone(), subscription.clone());
        if let Err(error) = self.send_json(&request).await {
            self.subscriptions.lock().await.remove(&subscription.id);
            return Err(error);
        }
        Ok(())
    }

    /// Subscribe with a single filter and receive matching events on a channel.
    pub async fn subscribe_filter(
        &self,
        subscription_id: impl Into<String>,
        filter: Filter,
    ) -> Result<tokio::sync::mpsc::Receiver<Event>> {
        let (subscription, events) = Subscription::with_channel(subscription_id, vec![filter]);
        self.subscribe(subscription).await?;
        Ok(events)
    }

    /// Close subscription on relay.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        if self.subscriptions.lock().await.remove(subscription_id).is_none() {
            return Ok(());
        }
        self.send_json(&json!(["CLOSE", subscription_id])).await
    }

    async fn send_json(&self, value: &Value) -> Result<()> {
        if self.state().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }
}

async fn route_message(
    message: RelayMessage,
    subscriptions: &Mutex<HashMap<String, Subscription>>,
    pending_acks: &Mutex<HashMap<String, oneshot::Sender<(bool, String)>>>,
    relay_url: &str,
) {
    match message {
        RelayMessage::Event(subscription_id, event) => {
            let mut subscriptions = subscriptions.lock().await;
            let Some(subscription) = subscriptions.get(&subscription_id) else {
                debug!("event for unknown subscription {} on {}", subscription_id, relay_url);
                return;
            };
            if subscription.is_closed() {
                subscriptions.remove(&subscription_id);
                return;
            }
            if let Err(error) = subscription.deliver(event) {
                warn!("dropping event for {} on {}: {}", subscription_id, relay_url, error);
            }
        }
        RelayMessage::Ok(event_id, accepted, text) => {
            if let Some(ack) = pending_acks.lock().await.remove(&event_id) {
                let _ = ack.send((accepted, text));
            }
        }
        RelayMessage::Eose(subscription_id) => {
            trace!("end of stored events for {} on {}", subscription_id, relay_url);
        }
        RelayMessage::Notice(text) => warn!("notice from {}: {}", relay_url, text),
        RelayMessage::Auth(challenge) => {
            debug!("ignoring AUTH challenge from {}: {}", relay_url, challenge);
        }
    }
}

/// Parse relay protocol JSON text message into typed relay message.
pub fn parse_relay_message(text: &str) -> Result<Option<RelayMessage>> {
    let value: Value = serde_json::from_str(text)?;
    let array = value
        .as_array()
        .ok_or_else(|| ClientError::Protocol("expected JSON array relay message".to_string()))?;
    let Some(kind) = array.first() else {
        return Ok(None);
    };
    let kind = kind
        .as_str()
        .ok_or_else(|| ClientError::Protocol("missing relay message kind".to_string()))?;

    let expect_len = |min: usize| {
        if array.len() < min {
            Err(ClientError::Protocol(format!("invalid {kind} message")))
        } else {
            Ok(())
        }
    };
    let string_at = |index: usize, what: &str| {
        array
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::Protocol(format!("invalid {kind} {what}")))
    };

    match kind {
        "EVENT" => {
            expect_len(3)?;
            let subscription_id = string_at(1, "subscription id")?;
            let event: Event = serde_json::from_value(array[2].clone()).map_err(|error| {
                ClientError::Protocol(format!("invalid EVENT payload: {}", error))
            })?;
            Ok(Some(RelayMessage::Event(subscription_id, event)))
        }
        "OK" => {
            expect_len(4)?;
            let event_id = string_at(1, "event id")?;
            let accepted = array[2]
                .as_bool()
                .ok_or_else(|| ClientError::Protocol("invalid OK accepted flag".to_string()))?;
            let message = string_at(3, "message text")?;
            Ok(Some(RelayMessage::Ok(event_id, accepted, message)))
        }
        "EOSE" => {
            expect_len(2)?;
            Ok(Some(RelayMessage::Eose(string_at(1, "subscription id")?)))
        }
        "NOTICE" => {
            expect_len(2)?;
            Ok(Some(RelayMessage::Notice(string_at(1, "message text")?)))
        }
        "AUTH" => {
            expect_len(2)?;
            Ok(Some(RelayMessage::Auth(string_at(1, "challenge")?)))
        }
        _ => Ok(None),
    }
}
