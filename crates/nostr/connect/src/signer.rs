//! Responder backed by a local secret key.

use async_trait::async_trait;
use nostr::nip04;
use nostr::{Conditions, Delegation, Event, UnsignedEvent, create_delegation, get_public_key_hex, sign_unsigned_event};
use tracing::debug;

use crate::dispatch::{ConnectHandler, RequestContext, unsupported};
use crate::error::{ConnectError, Result};
use crate::method::Method;

pub struct KeySigner {
    secret_key: [u8; 32],
    public_key: String,
}

impl KeySigner {
    pub fn new(secret_key: [u8; 32]) -> Result<Self> {
        Ok(Self {
            public_key: get_public_key_hex(&secret_key)?,
            secret_key,
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Methods this signer answers, as advertised by `describe`.
    pub fn supported_methods() -> Vec<String> {
        Method::ALL
            .into_iter()
            .filter(|method| *method != Method::SignPsbt)
            .map(|method| method.as_str().to_string())
            .collect()
    }
}

fn handler_error(error: impl std::fmt::Display) -> ConnectError {
    ConnectError::Handler(error.to_string())
}

#[async_trait]
impl ConnectHandler for KeySigner {
    async fn get_public_key(&self, _ctx: &RequestContext) -> Result<String> {
        Ok(self.public_key.clone())
    }

    async fn sign_event(&self, ctx: &RequestContext, draft: UnsignedEvent) -> Result<Event> {
        let event = sign_unsigned_event(&draft, &self.secret_key).map_err(handler_error)?;
        debug!("signed kind {} event {} for {}", event.kind, event.id, ctx.sender());
        Ok(event)
    }

    // No wallet descriptor support.
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
        Ok(Self::supported_methods())
    }

    async fn delegate(
        &self,
        ctx: &RequestContext,
        delegatee: String,
        conditions: Conditions,
    ) -> Result<Delegation> {
        let delegation = create_delegation(&self.secret_key, &delegatee, &conditions).map_err(handler_error)?;
        debug!("delegated '{}' to {} for {}", delegation.cond, delegatee, ctx.sender());
        Ok(delegation)
    }

    async fn nip04_encrypt(&self, _ctx: &RequestContext, pubkey: String, plaintext: String) -> Result<String> {
        nip04::encrypt(&self.secret_key, &pubkey, &plaintext).map_err(handler_error)
    }

    async fn nip04_decrypt(&self, _ctx: &RequestContext, pubkey: String, ciphertext: String) -> Result<String> {
        nip04::decrypt(&self.secret_key, &pubkey, &ciphertext).map_err(handler_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Request;
    use crate::dispatch::handle_request;
    use nostr::{generate_secret_key, verify_delegation, verify_event};
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new(Event {
            id: "envelope".to_string(),
            pubkey: "app".to_string(),
            created_at: 0,
            kind: 24133,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        })
    }

    #[tokio::test]
    async fn signs_drafts_with_its_own_key() -> Result<()> {
        let signer = KeySigner::new(generate_secret_key())?;
        let draft = UnsignedEvent {
            pubkey: String::new(),
            created_at: 1_700_000_000,
            kind: 1,
            tags: vec![],
            content: "hello".to_string(),
        };

        let event = signer.sign_event(&ctx(), draft.clone()).await?;
        assert_eq!(event.pubkey, signer.public_key());
        assert!(verify_event(&event)?);

        let foreign = UnsignedEvent {
            pubkey: get_public_key_hex(&generate_secret_key())?,
            ..draft
        };
        assert!(matches!(
            signer.sign_event(&ctx(), foreign).await,
            Err(ConnectError::Handler(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn delegation_tokens_verify() -> Result<()> {
        let signer = KeySigner::new(generate_secret_key())?;
        let delegatee = get_public_key_hex(&generate_secret_key())?;
        let conditions = Conditions {
            kind: Some(1),
            since: None,
            until: Some(1_900_000_000),
        };

        let delegation = signer.delegate(&ctx(), delegatee.clone(), conditions).await?;
        assert_eq!(delegation.from, signer.public_key());
        assert_eq!(delegation.to, delegatee);
        assert_eq!(verify_delegation(&delegation).ok(), Some(true));
        Ok(())
    }

    #[tokio::test]
    async fn describe_omits_psbt_signing() {
        let signer = match KeySigner::new(generate_secret_key()) {
            Ok(signer) => signer,
            Err(error) => panic!("signer: {error}"),
        };
        let response = handle_request(&signer, &ctx(), Request::with_id("1", "describe", vec![])).await;
        let methods = response.result.as_array().cloned().unwrap_or_default();
        assert_eq!(methods.len(), 8);
        assert!(!methods.contains(&json!("sign_psbt")));

        let psbt = Request::with_id("2", "sign_psbt", vec![json!("p"), json!("d"), json!("n")]);
        let response = handle_request(&signer, &ctx(), psbt).await;
        assert_eq!(response.error.as_deref(), Some("unsupported method: sign_psbt"));
    }

    #[tokio::test]
    async fn nip04_round_trips_with_a_peer() -> Result<()> {
        let signer = KeySigner::new(generate_secret_key())?;
        let peer_secret = generate_secret_key();
        let peer = get_public_key_hex(&peer_secret)?;

        let ciphertext = signer.nip04_encrypt(&ctx(), peer.clone(), "hi".to_string()).await?;
        let plaintext = nip04::decrypt(&peer_secret, signer.public_key(), &ciphertext)
            .map_err(handler_error)?;
        assert_eq!(plaintext, "hi");
        assert_eq!(signer.nip04_decrypt(&ctx(), peer, ciphertext).await?, "hi");
        Ok(())
    }
}
