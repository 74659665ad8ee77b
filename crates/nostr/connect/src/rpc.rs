//! Request/response correlation over two lazily opened relay channels.

use std::sync::Arc;
use std::time::Duration;

use nostr::{Event, get_public_key_hex, unix_now_secs};
use nostr_client::Filter;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::codec::{
    KIND_NOSTR_CONNECT, Request, Response, decode_request_payload, decode_response, encode_request,
    encode_response, random_id, request_from_payload,
};
use crate::dispatch::{ConnectHandler, RequestContext, handle_request};
use crate::error::{ConnectError, Result};
use crate::transport::{Connector, Transport};

type Channel = Mutex<Option<Arc<dyn Transport>>>;

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Publish and return immediately without waiting for a response.
    pub skip_response: bool,
    /// Overrides the engine's call timeout.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn one_way() -> Self {
        Self {
            skip_response: true,
            timeout: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            skip_response: false,
            timeout: Some(timeout),
        }
    }
}

/// RPC engine bound to one local key and one relay.
///
/// The outbound channel is opened on the first `call`, the inbound channel on the
/// first `listen`.
pub struct NostrRpc {
    relay_url: String,
    secret_key: [u8; 32],
    public_key: String,
    connector: Arc<dyn Connector>,
    call_timeout: Duration,
    outbound: Channel,
    inbound: Channel,
}

impl NostrRpc {
    pub fn new(
        relay_url: impl Into<String>,
        secret_key: [u8; 32],
        connector: Arc<dyn Connector>,
        call_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            relay_url: relay_url.into(),
            public_key: get_public_key_hex(&secret_key)?,
            secret_key,
            connector,
            call_timeout,
            outbound: Mutex::new(None),
            inbound: Mutex::new(None),
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Send `request` to `target` and wait for the response carrying the same id.
    ///
    /// Inbound traffic that does not decode, is not a response, or answers another
    /// id is skipped. The wait is bounded by the call timeout.
    pub async fn call(&self, target: &str, request: Request, options: CallOptions) -> Result<Value> {
        let transport = self.channel(&self.outbound).await?;
        let subscription_id = format!("call-{}", request.id);
        let filter = Filter::new()
            .kind(KIND_NOSTR_CONNECT)
            .author(target)
            .pubkey(&self.public_key)
            .since(unix_now_secs()?)
            .limit(1);
        let mut responses = transport.subscribe(&subscription_id, filter).await?;

        let sent = match encode_request(&self.secret_key, target, &request) {
            Ok(envelope) => transport.publish(&envelope).await,
            Err(error) => Err(error),
        };
        if let Err(error) = sent {
            release(transport.as_ref(), &subscription_id).await;
            return Err(error);
        }
        debug!("sent {} ({}) to {}", request.method, request.id, target);

        if options.skip_response {
            release(transport.as_ref(), &subscription_id).await;
            return Ok(Value::Null);
        }

        let deadline = options.timeout.unwrap_or(self.call_timeout);
        let outcome = timeout(deadline, self.await_response(&mut responses, &request.id)).await;
        release(transport.as_ref(), &subscription_id).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                debug!("{} ({}) to {} timed out", request.method, request.id, target);
                Err(ConnectError::Timeout(deadline))
            }
        }
    }

    async fn await_response(&self, responses: &mut mpsc::Receiver<Event>, id: &str) -> Result<Value> {
        while let Some(envelope) = responses.recv().await {
            let response = match decode_response(&self.secret_key, &envelope) {
                Ok(response) => response,
                Err(error) => {
                    trace!("skipping envelope {}: {}", envelope.id, error);
                    continue;
                }
            };
            if response.id != id {
                let mismatch = ConnectError::Protocol(format!(
                    "response id {} does not answer {}",
                    response.id, id
                ));
                trace!("{}", mismatch);
                continue;
            }
            return response.into_result();
        }
        Err(ConnectError::ChannelClosed(
            "response subscription ended".to_string(),
        ))
    }

    /// Serve inbound requests addressed to this key with `handler`.
    ///
    /// Envelopes are handled one at a time in arrival order. Undecodable traffic is
    /// dropped and response publish failures are only logged.
    pub async fn listen(&self, handler: Arc<dyn ConnectHandler>) -> Result<ListenHandle> {
        let transport = self.channel(&self.inbound).await?;
        let subscription_id = format!("listen-{}", random_id());
        let filter = Filter::new()
            .kind(KIND_NOSTR_CONNECT)
            .pubkey(&self.public_key)
            .since(unix_now_secs()?);
        let mut requests = transport.subscribe(&subscription_id, filter).await?;

        let responder = Responder {
            secret_key: self.secret_key,
            transport: Arc::clone(&transport),
            handler,
        };
        let task = tokio::spawn(async move {
            while let Some(envelope) = requests.recv().await {
                responder.respond(envelope).await;
            }
            debug!("request stream ended");
        });

        Ok(ListenHandle {
            task: Some(task),
            transport,
            subscription_id,
        })
    }

    /// Close both channels. Safe to call repeatedly and in any state.
    pub async fn disconnect_relays(&self) -> Result<()> {
        for slot in [&self.outbound, &self.inbound] {
            let transport = slot.lock().await.take();
            if let Some(transport) = transport {
                transport.close().await?;
            }
        }
        Ok(())
    }

    async fn channel(&self, slot: &Channel) -> Result<Arc<dyn Transport>> {
        let mut guard = slot.lock().await;
        let transport = match guard.as_ref() {
            Some(transport) => Arc::clone(transport),
            None => {
                let transport = self.connector.open(&self.relay_url)?;
                *guard = Some(Arc::clone(&transport));
                transport
            }
        };
        transport.connect().await?;
        Ok(transport)
    }
}

async fn release(transport: &dyn Transport, subscription_id: &str) {
    if let Err(error) = transport.unsubscribe(subscription_id).await {
        warn!("failed to close subscription {}: {}", subscription_id, error);
    }
}

struct Responder {
    secret_key: [u8; 32],
    transport: Arc<dyn Transport>,
    handler: Arc<dyn ConnectHandler>,
}

impl Responder {
    async fn respond(&self, envelope: Event) {
        let payload = match decode_request_payload(&self.secret_key, &envelope) {
            Ok(payload) => payload,
            Err(error) => {
                trace!("dropping envelope {}: {}", envelope.id, error);
                return;
            }
        };

        let ctx = RequestContext::new(envelope);
        let response = match request_from_payload(payload) {
            Ok(request) => {
                debug!("handling {} ({}) from {}", request.method, request.id, ctx.sender());
                handle_request(self.handler.as_ref(), &ctx, request).await
            }
            Err((Some(id), error)) => {
                debug!("rejecting request {} from {}: {}", id, ctx.sender(), error);
                Response::failure(id, error.to_string())
            }
            Err((None, error)) => {
                trace!("dropping envelope {}: {}", ctx.event().id, error);
                return;
            }
        };

        let published = match encode_response(&self.secret_key, ctx.sender(), &response) {
            Ok(envelope) => self.transport.publish(&envelope).await,
            Err(error) => Err(error),
        };
        if let Err(error) = published {
            warn!("failed to answer {} from {}: {}", response.id, ctx.sender(), error);
        }
    }
}

/// Running listener. Dropping it stops the loop without closing the subscription.
pub struct ListenHandle {
    task: Option<JoinHandle<()>>,
    transport: Arc<dyn Transport>,
    subscription_id: String,
}

impl ListenHandle {
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop and close its subscription.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.transport.unsubscribe(&self.subscription_id).await
    }
}

impl Drop for ListenHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRelay;
    use nostr::generate_secret_key;
    use serde_json::json;

    fn engine(relay: &MemoryRelay, secret_key: [u8; 32]) -> Result<NostrRpc> {
        NostrRpc::new(
            "memory://relay",
            secret_key,
            Arc::new(relay.clone()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn channels_open_lazily_and_teardown_is_idempotent() -> Result<()> {
        let relay = MemoryRelay::new();
        let rpc = engine(&relay, generate_secret_key())?;
        assert_eq!(relay.opened_channels(), 0);

        rpc.disconnect_relays().await?;
        let target = get_public_key_hex(&generate_secret_key())?;
        rpc.call(&target, Request::new("connect", vec![json!("x")]), CallOptions::one_way())
            .await?;
        assert_eq!(relay.opened_channels(), 1);
        assert_eq!(relay.subscription_count().await, 0);

        rpc.disconnect_relays().await?;
        rpc.disconnect_relays().await?;
        Ok(())
    }

    #[tokio::test]
    async fn call_skips_foreign_and_malformed_traffic() -> Result<()> {
        let relay = MemoryRelay::new();
        let caller_key = generate_secret_key();
        let caller = engine(&relay, caller_key)?;
        let responder_key = generate_secret_key();
        let responder_pk = get_public_key_hex(&responder_key)?;

        let request = Request::with_id("wanted", "describe", vec![]);
        let call = caller.call(&responder_pk, request, CallOptions::default());
        let answer = async {
            while relay.published_count() == 0 {
                tokio::task::yield_now().await;
            }
            let to_caller = caller.public_key().to_string();
            let noise = [
                encode_response(&responder_key, &to_caller, &Response::success("other", json!(1))),
                crate::codec::encode_envelope(&responder_key, &to_caller, "{\"id\":\"wanted\"}"),
                encode_response(&responder_key, &to_caller, &Response::success("wanted", json!(["describe"]))),
            ];
            for envelope in noise {
                relay.inject(envelope?).await;
            }
            Ok::<_, ConnectError>(())
        };

        let (result, injected) = tokio::join!(call, answer);
        injected?;
        assert_eq!(result?, json!(["describe"]));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_times_out() -> Result<()> {
        let relay = MemoryRelay::new();
        let rpc = engine(&relay, generate_secret_key())?;
        let target = get_public_key_hex(&generate_secret_key())?;

        let outcome = rpc
            .call(
                &target,
                Request::new("disconnect", vec![]),
                CallOptions::with_timeout(Duration::from_secs(2)),
            )
            .await;
        assert!(matches!(outcome, Err(ConnectError::Timeout(deadline)) if deadline == Duration::from_secs(2)));
        assert_eq!(relay.subscription_count().await, 0);
        Ok(())
    }
}
