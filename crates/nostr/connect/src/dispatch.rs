//! Responder-side dispatch from decoded requests to typed handler methods.

use async_trait::async_trait;
use nostr::{Conditions, Delegation, Event, UnsignedEvent};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::codec::{Request, Response};
use crate::error::{ConnectError, Result};
use crate::method::Method;

/// Transport context of the request being handled.
#[derive(Debug, Clone)]
pub struct RequestContext {
    event: Event,
}

impl RequestContext {
    pub fn new(event: Event) -> Self {
        Self { event }
    }

    /// Public key of the party that sent the request.
    pub fn sender(&self) -> &str {
        &self.event.pubkey
    }

    pub fn event(&self) -> &Event {
        &self.event
    }
}

/// Local implementation of the NostrConnect methods.
///
/// Every method defaults to `UnsupportedMethod`, except `connect` and `disconnect`
/// which accept. Errors become the response's `error` text.
#[async_trait]
pub trait ConnectHandler: Send + Sync {
    async fn connect(&self, _ctx: &RequestContext, _pubkey: String) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }

    async fn get_public_key(&self, _ctx: &RequestContext) -> Result<String> {
        Err(unsupported(Method::GetPublicKey))
    }

    async fn sign_event(&self, _ctx: &RequestContext, _draft: UnsignedEvent) -> Result<Event> {
        Err(unsupported(Method::SignEvent))
    }

    async fn sign_psbt(
        &self,
        _ctx: &RequestContext,
        _psbt: String,
        _descriptor: String,
        _network: String,
    ) -> Result<String> {
        Err(unsupported(Method::SignPsbt))
    }

    async fn describe(&self, _ctx: &RequestContext) -> Result<Vec<String>> {
        Err(unsupported(Method::Describe))
    }

    async fn delegate(
        &self,
        _ctx: &RequestContext,
        _delegatee: String,
        _conditions: Conditions,
    ) -> Result<Delegation> {
        Err(unsupported(Method::Delegate))
    }

    async fn nip04_encrypt(
        &self,
        _ctx: &RequestContext,
        _pubkey: String,
        _plaintext: String,
    ) -> Result<String> {
        Err(unsupported(Method::Nip04Encrypt))
    }

    async fn nip04_decrypt(
        &self,
        _ctx: &RequestContext,
        _pubkey: String,
        _ciphertext: String,
    ) -> Result<String> {
        Err(unsupported(Method::Nip04Decrypt))
    }
}

pub(crate) fn unsupported(method: Method) -> ConnectError {
    ConnectError::UnsupportedMethod(method.to_string())
}

/// Run one request through `handler`. Always yields exactly one response.
pub async fn handle_request(
    handler: &dyn ConnectHandler,
    ctx: &RequestContext,
    request: Request,
) -> Response {
    let Request { id, method, params } = request;
    match dispatch(handler, ctx, &method, params).await {
        Ok(result) => Response::success(id, result),
        Err(error) => {
            debug!("{} from {} failed ({}): {}", method, ctx.sender(), error.code(), error);
            Response::failure(id, error.to_string())
        }
    }
}

async fn dispatch(
    handler: &dyn ConnectHandler,
    ctx: &RequestContext,
    method: &str,
    params: Vec<Value>,
) -> Result<Value> {
    let method: Method = method.parse()?;
    let mut params = Params::new(method, params)?;

    let result = match method {
        Method::Connect => {
            handler.connect(ctx, params.next("pubkey")?).await?;
            json!("ack")
        }
        Method::Disconnect => {
            handler.disconnect(ctx).await?;
            json!("ack")
        }
        Method::GetPublicKey => json!(handler.get_public_key(ctx).await?),
        Method::SignEvent => serde_json::to_value(handler.sign_event(ctx, params.next("event")?).await?)?,
        Method::SignPsbt => {
            let psbt = params.next("psbt")?;
            let descriptor = params.next("descriptor")?;
            let network = params.next("network")?;
            json!(handler.sign_psbt(ctx, psbt, descriptor, network).await?)
        }
        Method::Describe => json!(handler.describe(ctx).await?),
        Method::Delegate => {
            let delegatee = params.next("delegatee")?;
            let conditions = params.next("conditions")?;
            serde_json::to_value(handler.delegate(ctx, delegatee, conditions).await?)?
        }
        Method::Nip04Encrypt => {
            let pubkey = params.next("pubkey")?;
            let plaintext = params.next("plaintext")?;
            json!(handler.nip04_encrypt(ctx, pubkey, plaintext).await?)
        }
        Method::Nip04Decrypt => {
            let pubkey = params.next("pubkey")?;
            let ciphertext = params.next("ciphertext")?;
            json!(handler.nip04_decrypt(ctx, pubkey, ciphertext).await?)
        }
    };
    Ok(result)
}

/// Positional params with an exact arity check up front.
struct Params {
    method: Method,
    values: std::vec::IntoIter<Value>,
}

impl Params {
    fn new(method: Method, values: Vec<Value>) -> Result<Self> {
        if values.len() != method.arity() {
            return Err(ConnectError::InvalidParams(format!(
                "{method} expects {} params, got {}",
                method.arity(),
                values.len()
            )));
        }
        Ok(Self {
            method,
            values: values.into_iter(),
        })
    }

    fn next<T: DeserializeOwned>(&mut self, name: &str) -> Result<T> {
        let value = self.values.next().ok_or_else(|| {
            ConnectError::InvalidParams(format!("{}: missing {name}", self.method))
        })?;
        serde_json::from_value(value)
            .map_err(|error| ConnectError::InvalidParams(format!("{}: {name}: {error}", self.method)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture;

    #[async_trait]
    impl ConnectHandler for Fixture {
        async fn get_public_key(&self, _ctx: &RequestContext) -> Result<String> {
            Ok("pk1".to_string())
        }

        async fn sign_event(&self, _ctx: &RequestContext, _draft: UnsignedEvent) -> Result<Event> {
            Err(ConnectError::Handler("bad kind".to_string()))
        }

        async fn describe(&self, _ctx: &RequestContext) -> Result<Vec<String>> {
            Ok(vec!["describe".to_string()])
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Event {
            id: "envelope".to_string(),
            pubkey: "caller".to_string(),
            created_at: 0,
            kind: 24133,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        })
    }

    fn draft() -> Value {
        json!({"pubkey": "", "created_at": 1, "kind": 1, "tags": [], "content": "hi"})
    }

    #[tokio::test]
    async fn get_public_key_result_is_framed_as_success() -> Result<()> {
        let request: Request =
            serde_json::from_str(r#"{"id":"1","method":"get_public_key","params":[]}"#)?;
        let response = handle_request(&Fixture, &ctx(), request).await;
        assert_eq!(
            serde_json::to_string(&response)?,
            r#"{"id":"1","result":"pk1","error":null}"#
        );
        Ok(())
    }

    #[tokio::test]
    async fn handler_failure_is_framed_as_error() -> Result<()> {
        let request = Request::with_id("2", "sign_event", vec![draft()]);
        let response = handle_request(&Fixture, &ctx(), request).await;
        assert_eq!(
            serde_json::to_string(&response)?,
            r#"{"id":"2","result":null,"error":"bad kind"}"#
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_method_answers_unsupported() {
        let request = Request::with_id("3", "get_relays", vec![]);
        let response = handle_request(&Fixture, &ctx(), request).await;
        assert_eq!(response.result, Value::Null);
        assert_eq!(response.error.as_deref(), Some("unsupported method: get_relays"));
    }

    #[tokio::test]
    async fn wrong_arity_is_rejected_before_the_handler_runs() {
        let request = Request::with_id("4", "connect", vec![]);
        let response = handle_request(&Fixture, &ctx(), request).await;
        assert!(
            response
                .error
                .as_deref()
                .is_some_and(|error| error.contains("connect expects 1 params, got 0"))
        );

        let request = Request::with_id("5", "describe", vec![json!("extra")]);
        let response = handle_request(&Fixture, &ctx(), request).await;
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn every_method_yields_exactly_one_framed_response() {
        let valid_params = |method: Method| match method {
            Method::Connect => vec![json!("peer")],
            Method::Disconnect | Method::GetPublicKey | Method::Describe => vec![],
            Method::SignEvent => vec![draft()],
            Method::SignPsbt => vec![json!("psbt"), json!("wpkh()"), json!("testnet")],
            Method::Delegate => vec![json!("delegatee"), json!({"kind": 1})],
            Method::Nip04Encrypt | Method::Nip04Decrypt => vec![json!("peer"), json!("text")],
        };

        for method in Method::ALL {
            let request = Request::with_id(method.as_str(), method.as_str(), valid_params(method));
            let response = handle_request(&Fixture, &ctx(), request).await;
            assert_eq!(response.id, method.as_str());
            assert_ne!(
                response.result.is_null(),
                response.error.is_none(),
                "{method}: {response:?}"
            );
        }
    }

    #[tokio::test]
    async fn connect_and_disconnect_acknowledge() {
        for (method, params) in [("connect", vec![json!("peer")]), ("disconnect", vec![])] {
            let response = handle_request(&Fixture, &ctx(), Request::with_id("1", method, params)).await;
            assert_eq!(response.result, json!("ack"));
            assert!(response.error.is_none());
        }
    }
}
