//! Pairing state machine and the capability surface of a remote signer.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use nostr::{Conditions, Delegation, Event, UnsignedEvent, unix_now_secs};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::codec::Request;
use crate::config::ConnectConfig;
use crate::delegation::DelegationConditions;
use crate::dispatch::{ConnectHandler, RequestContext, unsupported};
use crate::error::{ConnectError, Result};
use crate::method::Method;
use crate::rpc::{CallOptions, ListenHandle, NostrRpc};
use crate::transport::Connector;

const SESSION_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unpaired,
    Paired(String),
}

/// Pairing transition broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Paired(String),
    Unpaired,
}

/// When a local `disconnect` notifies observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Emit `Unpaired` before sending; emit `Paired` again if the send fails.
    #[default]
    Optimistic,
    /// Emit `Unpaired` only after the send succeeded.
    Confirmed,
}

impl FromStr for DisconnectPolicy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "optimistic" => Ok(Self::Optimistic),
            "confirmed" => Ok(Self::Confirmed),
            other => Err(format!("expected optimistic or confirmed, got {other:?}")),
        }
    }
}

impl fmt::Display for DisconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Optimistic => f.write_str("optimistic"),
            Self::Confirmed => f.write_str("confirmed"),
        }
    }
}

/// Shared pairing state, also driven by the listener task.
#[derive(Clone)]
struct Pairing {
    state: Arc<RwLock<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Pairing {
    async fn pair(&self, counterparty: String) {
        *self.state.write().await = SessionState::Paired(counterparty.clone());
        info!("paired with {}", counterparty);
        self.emit(SessionEvent::Paired(counterparty));
    }

    async fn unpair(&self) {
        let previous = std::mem::replace(&mut *self.state.write().await, SessionState::Unpaired);
        if let SessionState::Paired(counterparty) = previous {
            info!("unpaired from {}", counterparty);
            self.emit(SessionEvent::Unpaired);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Inbound `connect`/`disconnect` update the pairing before reaching the wrapped handler.
struct PairingHandler {
    pairing: Pairing,
    inner: Option<Arc<dyn ConnectHandler>>,
}

impl PairingHandler {
    fn inner(&self, method: Method) -> Result<&dyn ConnectHandler> {
        self.inner.as_deref().ok_or_else(|| unsupported(method))
    }
}

#[async_trait]
impl ConnectHandler for PairingHandler {
    async fn connect(&self, ctx: &RequestContext, pubkey: String) -> Result<()> {
        if pubkey != ctx.sender() {
            debug!("connect from {} names {}", ctx.sender(), pubkey);
        }
        self.pairing.pair(pubkey.clone()).await;
        match &self.inner {
            Some(inner) => inner.connect(ctx, pubkey).await,
            None => Ok(()),
        }
    }

    async fn disconnect(&self, ctx: &RequestContext) -> Result<()> {
        self.pairing.unpair().await;
        match &self.inner {
            Some(inner) => inner.disconnect(ctx).await,
            None => Ok(()),
        }
    }

    async fn get_public_key(&self, ctx: &RequestContext) -> Result<String> {
        self.inner(Method::GetPublicKey)?.get_public_key(ctx).await
    }

    async fn sign_event(&self, ctx: &RequestContext, draft: UnsignedEvent) -> Result<Event> {
        self.inner(Method::SignEvent)?.sign_event(ctx, draft).await
    }

    async fn sign_psbt(
        &self,
        ctx: &RequestContext,
        psbt: String,
        descriptor: String,
        network: String,
    ) -> Result<String> {
        self.inner(Method::SignPsbt)?
            .sign_psbt(ctx, psbt, descriptor, network)
            .await
    }

    async fn describe(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        self.inner(Method::Describe)?.describe(ctx).await
    }

    async fn delegate(
        &self,
        ctx: &RequestContext,
        delegatee: String,
        conditions: Conditions,
    ) -> Result<Delegation> {
        self.inner(Method::Delegate)?
            .delegate(ctx, delegatee, conditions)
            .await
    }

    async fn nip04_encrypt(&self, ctx: &RequestContext, pubkey: String, plaintext: String) -> Result<String> {
        self.inner(Method::Nip04Encrypt)?
            .nip04_encrypt(ctx, pubkey, plaintext)
            .await
    }

    async fn nip04_decrypt(&self, ctx: &RequestContext, pubkey: String, ciphertext: String) -> Result<String> {
        self.inner(Method::Nip04Decrypt)?
            .nip04_decrypt(ctx, pubkey, ciphertext)
            .await
    }
}

/// A local party's view of its pairing with one remote counterparty.
pub struct Session {
    rpc: NostrRpc,
    pairing: Pairing,
    policy: DisconnectPolicy,
    listener: Mutex<Option<ListenHandle>>,
}

impl Session {
    /// Create a session, pre-paired when `target` is known.
    pub fn new(
        relay_url: impl Into<String>,
        secret_key: [u8; 32],
        target: Option<String>,
        connector: Arc<dyn Connector>,
        config: &ConnectConfig,
    ) -> Result<Self> {
        let rpc = NostrRpc::new(relay_url, secret_key, connector, config.call_timeout)?;
        let state = match target {
            Some(target) => SessionState::Paired(target),
            None => SessionState::Unpaired,
        };
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Ok(Self {
            rpc,
            pairing: Pairing {
                state: Arc::new(RwLock::new(state)),
                events,
            },
            policy: config.disconnect_policy,
            listener: Mutex::new(None),
        })
    }

    pub fn rpc(&self) -> &NostrRpc {
        &self.rpc
    }

    pub fn public_key(&self) -> &str {
        self.rpc.public_key()
    }

    pub async fn state(&self) -> SessionState {
        self.pairing.state.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.state().await, SessionState::Paired(_))
    }

    /// The paired counterparty, or `NotConnected`.
    pub async fn target(&self) -> Result<String> {
        match &*self.pairing.state.read().await {
            SessionState::Paired(target) => Ok(target.clone()),
            SessionState::Unpaired => Err(ConnectError::NotConnected),
        }
    }

    /// Register an observer; it receives every transition from now on, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.pairing.events.subscribe()
    }

    /// Listen for pairing requests only.
    pub async fn init(&self) -> Result<()> {
        self.start_listener(None).await
    }

    /// Serve `handler`, with inbound `connect`/`disconnect` also driving the pairing.
    pub async fn listen(&self, handler: Arc<dyn ConnectHandler>) -> Result<()> {
        self.start_listener(Some(handler)).await
    }

    async fn start_listener(&self, inner: Option<Arc<dyn ConnectHandler>>) -> Result<()> {
        let handler = Arc::new(PairingHandler {
            pairing: self.pairing.clone(),
            inner,
        });
        let handle = self.rpc.listen(handler).await?;
        let previous = self.listener.lock().await.replace(handle);
        if let Some(previous) = previous {
            previous.stop().await?;
        }
        Ok(())
    }

    pub async fn get_public_key(&self) -> Result<String> {
        self.request(Method::GetPublicKey, vec![]).await
    }

    pub async fn sign_event(&self, draft: &UnsignedEvent) -> Result<Event> {
        self.request(Method::SignEvent, vec![serde_json::to_value(draft)?])
            .await
    }

    pub async fn sign_psbt(&self, psbt: &str, descriptor: &str, network: &str) -> Result<String> {
        self.request(
            Method::SignPsbt,
            vec![json!(psbt), json!(descriptor), json!(network)],
        )
        .await
    }

    pub async fn describe(&self) -> Result<Vec<String>> {
        self.request(Method::Describe, vec![]).await
    }

    /// Ask the signer for a delegation token. `delegatee` defaults to the local key.
    ///
    /// Relative horizons in `conditions` are resolved against the current time.
    pub async fn delegate(
        &self,
        delegatee: Option<&str>,
        conditions: &DelegationConditions,
    ) -> Result<Delegation> {
        let conditions = conditions.resolve(unix_now_secs()?)?;
        let delegatee = delegatee.unwrap_or(self.rpc.public_key());
        self.request(
            Method::Delegate,
            vec![json!(delegatee), serde_json::to_value(conditions)?],
        )
        .await
    }

    pub fn nip04(&self) -> Nip04<'_> {
        Nip04 { session: self }
    }

    /// Notify the counterparty and drop the pairing.
    pub async fn disconnect(&self) -> Result<()> {
        let target = self.target().await?;
        let request = Request::new(Method::Disconnect.as_str(), vec![]);

        if self.policy == DisconnectPolicy::Optimistic {
            self.pairing.emit(SessionEvent::Unpaired);
        }
        if let Err(error) = self.rpc.call(&target, request, CallOptions::one_way()).await {
            warn!("disconnect notification to {} failed: {}", target, error);
            if self.policy == DisconnectPolicy::Optimistic {
                self.pairing.emit(SessionEvent::Paired(target));
            }
            return Err(ConnectError::Disconnect(error.to_string()));
        }

        *self.pairing.state.write().await = SessionState::Unpaired;
        if self.policy == DisconnectPolicy::Confirmed {
            self.pairing.emit(SessionEvent::Unpaired);
        }
        info!("disconnected from {}", target);
        Ok(())
    }

    /// Stop listening and close both relay channels. Pairing state is kept.
    pub async fn close(&self) -> Result<()> {
        let listener = self.listener.lock().await.take();
        if let Some(listener) = listener
            && let Err(error) = listener.stop().await
        {
            debug!("listener stop failed: {}", error);
        }
        self.rpc.disconnect_relays().await
    }

    async fn request<T: DeserializeOwned>(&self, method: Method, params: Vec<Value>) -> Result<T> {
        let target = self.target().await?;
        let result = self
            .rpc
            .call(&target, Request::new(method.as_str(), params), CallOptions::default())
            .await?;
        serde_json::from_value(result)
            .map_err(|error| ConnectError::Decoding(format!("{method} result: {error}")))
    }
}

/// NIP-04 capabilities of the paired signer.
pub struct Nip04<'a> {
    session: &'a Session,
}

impl Nip04<'_> {
    pub async fn encrypt(&self, pubkey: &str, plaintext: &str) -> Result<String> {
        self.session
            .request(Method::Nip04Encrypt, vec![json!(pubkey), json!(plaintext)])
            .await
    }

    pub async fn decrypt(&self, pubkey: &str, ciphertext: &str) -> Result<String> {
        self.session
            .request(Method::Nip04Decrypt, vec![json!(pubkey), json!(ciphertext)])
            .await
    }
}
