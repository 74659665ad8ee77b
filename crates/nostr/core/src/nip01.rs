//! NIP-01: basic event model, hashing, signing and verification.

use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{Keypair, Message, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// NIP-01 error types
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("system clock error: {0}")]
    Clock(String),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().is_some_and(|tag_name| tag_name == name) && tag.len() > 1)
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Public keys referenced by `p` tags.
    pub fn p_tags(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter(|tag| tag.first().is_some_and(|tag_name| tag_name == "p"))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }
}

/// Event fields chosen by the author before signing. The signing key supplies `pubkey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// Event draft carrying an explicit author, as handed to a remote signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    #[serde(default)]
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
}

pub fn unix_now_secs() -> Result<u64, Nip01Error> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .map_err(|error| Nip01Error::Clock(error.to_string()))
}

/// Generate a random, valid secp256k1 secret key.
pub fn generate_secret_key() -> [u8; 32] {
    loop {
        let candidate: [u8; 32] = rand::random();
        if SecretKey::from_slice(&candidate).is_ok() {
            return candidate;
        }
    }
}

/// X-only public key for `secret_key`.
pub fn get_public_key(secret_key: &[u8; 32]) -> Result<[u8; 32], Nip01Error> {
    let keypair = keypair(secret_key)?;
    let (public_key, _parity) = keypair.x_only_public_key();
    Ok(public_key.serialize())
}

pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    get_public_key(secret_key).map(hex::encode)
}

/// Event id: sha256 of the canonical `[0, pubkey, created_at, kind, tags, content]` array.
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let canonical = serde_json::to_string(&json!([
        0,
        event.pubkey,
        event.created_at,
        event.kind,
        event.tags,
        event.content
    ]))?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Hash and sign a template with `secret_key`.
pub fn finalize_event(template: &EventTemplate, secret_key: &[u8; 32]) -> Result<Event, Nip01Error> {
    let unsigned = UnsignedEvent {
        pubkey: get_public_key_hex(secret_key)?,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
    };
    sign_unsigned_event(&unsigned, secret_key)
}

/// Sign a draft. An empty `pubkey` is filled in; a pubkey belonging to another key is rejected.
pub fn sign_unsigned_event(
    draft: &UnsignedEvent,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let signer_pubkey = get_public_key_hex(secret_key)?;
    if !draft.pubkey.is_empty() && !draft.pubkey.eq_ignore_ascii_case(&signer_pubkey) {
        return Err(Nip01Error::InvalidEvent(format!(
            "draft pubkey {} does not match signing key {}",
            draft.pubkey, signer_pubkey
        )));
    }

    let unsigned = UnsignedEvent {
        pubkey: signer_pubkey,
        ..draft.clone()
    };
    let id = get_event_hash(&unsigned)?;
    let digest = decode_fixed::<32>(&id)
        .ok_or_else(|| Nip01Error::InvalidEvent("event hash is not 32 bytes".to_string()))?;
    let sig = sign_digest(secret_key, digest)?;

    Ok(Event {
        id,
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig,
    })
}

/// Structural check: hex id, pubkey and signature of the right lengths.
pub fn validate_event(event: &Event) -> bool {
    decode_fixed::<32>(&event.id).is_some()
        && decode_fixed::<32>(&event.pubkey).is_some()
        && decode_fixed::<64>(&event.sig).is_some()
}

/// Recompute the id and check the Schnorr signature against `pubkey`.
pub fn verify_event(event: &Event) -> Result<bool, Nip01Error> {
    if !validate_event(event) {
        return Ok(false);
    }

    let expected_id = get_event_hash(&UnsignedEvent {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    })?;
    if !expected_id.eq_ignore_ascii_case(&event.id) {
        return Ok(false);
    }

    let digest = decode_fixed::<32>(&event.id)
        .ok_or_else(|| Nip01Error::InvalidEvent("event id is not 32 bytes".to_string()))?;
    verify_digest(&event.pubkey, digest, &event.sig)
}

pub(crate) fn sign_digest(secret_key: &[u8; 32], digest: [u8; 32]) -> Result<String, Nip01Error> {
    let secp = Secp256k1::new();
    let keypair = keypair(secret_key)?;
    let aux: [u8; 32] = rand::random();
    let signature =
        secp.sign_schnorr_with_aux_rand(&Message::from_digest(digest), &keypair, &aux);
    Ok(hex::encode(signature.serialize()))
}

pub(crate) fn verify_digest(
    pubkey_hex: &str,
    digest: [u8; 32],
    sig_hex: &str,
) -> Result<bool, Nip01Error> {
    let public_key = parse_public_key(pubkey_hex)?;
    let sig_bytes = decode_fixed::<64>(sig_hex)
        .ok_or_else(|| Nip01Error::InvalidSignature("expected 64-byte hex".to_string()))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|error| Nip01Error::InvalidSignature(error.to_string()))?;

    let secp = Secp256k1::verification_only();
    Ok(secp
        .verify_schnorr(&signature, &Message::from_digest(digest), &public_key)
        .is_ok())
}

pub(crate) fn parse_public_key(pubkey_hex: &str) -> Result<XOnlyPublicKey, Nip01Error> {
    let bytes = decode_fixed::<32>(pubkey_hex)
        .ok_or_else(|| Nip01Error::InvalidPublicKey(format!("expected 32-byte hex: {pubkey_hex}")))?;
    XOnlyPublicKey::from_slice(&bytes).map_err(|error| Nip01Error::InvalidPublicKey(error.to_string()))
}

pub(crate) fn parse_secret_key(secret_key: &[u8; 32]) -> Result<SecretKey, Nip01Error> {
    SecretKey::from_slice(secret_key).map_err(|error| Nip01Error::InvalidSecretKey(error.to_string()))
}

fn keypair(secret_key: &[u8; 32]) -> Result<Keypair, Nip01Error> {
    let secp = Secp256k1::new();
    Ok(Keypair::from_secret_key(&secp, &parse_secret_key(secret_key)?))
}

fn decode_fixed<const N: usize>(value: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(value).ok()?;
    <[u8; N]>::try_from(bytes.as_slice()).ok()
}
