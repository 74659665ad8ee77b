//! Wire bodies and the encrypted kind-24133 envelope that carries them.

use nostr::nip04;
use nostr::{Event, EventTemplate, finalize_event, unix_now_secs, verify_event};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConnectError, Result};

/// Event kind reserved for NostrConnect traffic.
pub const KIND_NOSTR_CONNECT: u16 = 24133;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub params: Vec<Value>,
}

impl Request {
    /// Build a request with a fresh random id.
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::with_id(random_id(), method, params)
    }

    pub fn with_id(id: impl Into<String>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Response body. Both `result` and `error` are always serialized, as `null` when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub result: Value,
    pub error: Option<String>,
}

impl Response {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result,
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Value::Null,
            error: Some(message.into()),
        }
    }

    /// A non-empty `error` rejects; anything else resolves with `result`.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(message) if !message.is_empty() => Err(ConnectError::Remote(message)),
            _ => Ok(self.result),
        }
    }
}

/// True iff `payload` is an object carrying `id`, `method` and `params`.
pub fn is_valid_request_shape(payload: &Value) -> bool {
    has_keys(payload, &["id", "method", "params"])
}

/// True iff `payload` is an object carrying `id`, `result` and `error`.
pub fn is_valid_response_shape(payload: &Value) -> bool {
    has_keys(payload, &["id", "result", "error"])
}

fn has_keys(payload: &Value, keys: &[&str]) -> bool {
    payload
        .as_object()
        .is_some_and(|object| keys.iter().all(|key| object.contains_key(*key)))
}

/// Encrypt `plaintext` to `recipient` and wrap it in a signed envelope tagged for them.
pub fn encode_envelope(secret_key: &[u8; 32], recipient: &str, plaintext: &str) -> Result<Event> {
    let content = nip04::encrypt(secret_key, recipient, plaintext)
        .map_err(|error| ConnectError::Encoding(error.to_string()))?;
    let template = EventTemplate {
        created_at: unix_now_secs()?,
        kind: KIND_NOSTR_CONNECT,
        tags: vec![vec!["p".to_string(), recipient.to_string()]],
        content,
    };
    finalize_event(&template, secret_key).map_err(|error| ConnectError::Encoding(error.to_string()))
}

/// Verify an inbound envelope and decrypt its content using the sender as peer.
pub fn decode_envelope(secret_key: &[u8; 32], envelope: &Event) -> Result<String> {
    if envelope.kind != KIND_NOSTR_CONNECT {
        return Err(ConnectError::Decoding(format!("unexpected kind {}", envelope.kind)));
    }
    if !verify_event(envelope).unwrap_or(false) {
        return Err(ConnectError::Decoding(format!(
            "envelope {} failed verification",
            envelope.id
        )));
    }
    nip04::decrypt(secret_key, &envelope.pubkey, &envelope.content)
        .map_err(|error| ConnectError::Decoding(error.to_string()))
}

pub fn encode_request(secret_key: &[u8; 32], recipient: &str, request: &Request) -> Result<Event> {
    encode_envelope(secret_key, recipient, &serde_json::to_string(request)?)
}

pub fn encode_response(secret_key: &[u8; 32], recipient: &str, response: &Response) -> Result<Event> {
    encode_envelope(secret_key, recipient, &serde_json::to_string(response)?)
}

pub fn decode_request(secret_key: &[u8; 32], envelope: &Event) -> Result<Request> {
    decode_body(secret_key, envelope, is_valid_request_shape, "request")
}

/// Decrypt an inbound request and check its shape, leaving field types unchecked.
pub fn decode_request_payload(secret_key: &[u8; 32], envelope: &Event) -> Result<Value> {
    decode_payload(secret_key, envelope, is_valid_request_shape, "request")
}

/// Type a shape-checked request payload.
///
/// On failure the string `id`, when there is one, is handed back so the
/// caller can still answer with an error response.
pub fn request_from_payload(
    payload: Value,
) -> std::result::Result<Request, (Option<String>, ConnectError)> {
    let id = payload.get("id").and_then(Value::as_str).map(str::to_string);
    serde_json::from_value(payload)
        .map_err(|error| (id, ConnectError::InvalidParams(format!("malformed request: {error}"))))
}

pub fn decode_response(secret_key: &[u8; 32], envelope: &Event) -> Result<Response> {
    decode_body(secret_key, envelope, is_valid_response_shape, "response")
}

fn decode_body<T: serde::de::DeserializeOwned>(
    secret_key: &[u8; 32],
    envelope: &Event,
    valid_shape: fn(&Value) -> bool,
    what: &str,
) -> Result<T> {
    let payload = decode_payload(secret_key, envelope, valid_shape, what)?;
    serde_json::from_value(payload).map_err(|error| ConnectError::Decoding(format!("{what}: {error}")))
}

fn decode_payload(
    secret_key: &[u8; 32],
    envelope: &Event,
    valid_shape: fn(&Value) -> bool,
    what: &str,
) -> Result<Value> {
    let plaintext = decode_envelope(secret_key, envelope)?;
    let payload: Value = serde_json::from_str(&plaintext)
        .map_err(|error| ConnectError::Decoding(format!("{what} is not JSON: {error}")))?;
    if !valid_shape(&payload) {
        return Err(ConnectError::Decoding(format!("payload is not a {what}")));
    }
    Ok(payload)
}

/// Opaque request id: 16 random bytes, hex encoded.
pub fn random_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
