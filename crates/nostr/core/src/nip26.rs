//! NIP-26: delegated event signing.
//!
//! A delegation token is a Schnorr signature over
//! `sha256("nostr:delegation:<delegatee>:<conditions>")` made with the delegator's key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::nip01::{Nip01Error, get_public_key_hex, parse_public_key, sign_digest, verify_digest};

#[derive(Debug, Error)]
pub enum Nip26Error {
    #[error("key error: {0}")]
    Key(#[from] Nip01Error),

    #[error("invalid conditions: {0}")]
    InvalidConditions(String),
}

/// Delegation conditions as absolute values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
}

impl Conditions {
    /// Render as the NIP-26 query string, e.g. `kind=1&created_at>1700000000`.
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(kind) = self.kind {
            parts.push(format!("kind={kind}"));
        }
        if let Some(since) = self.since {
            parts.push(format!("created_at>{since}"));
        }
        if let Some(until) = self.until {
            parts.push(format!("created_at<{until}"));
        }
        parts.join("&")
    }

    pub fn validate(&self) -> Result<(), Nip26Error> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since >= until
        {
            return Err(Nip26Error::InvalidConditions(format!(
                "since ({since}) must be before until ({until})"
            )));
        }
        Ok(())
    }
}

/// Signed delegation token handed back to the delegatee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub from: String,
    pub to: String,
    pub cond: String,
    pub sig: String,
}

impl Delegation {
    /// The `["delegation", from, cond, sig]` tag the delegatee attaches to its events.
    pub fn to_tag(&self) -> Vec<String> {
        vec![
            "delegation".to_string(),
            self.from.clone(),
            self.cond.clone(),
            self.sig.clone(),
        ]
    }
}

pub fn create_delegation(
    secret_key: &[u8; 32],
    delegatee_pubkey: &str,
    conditions: &Conditions,
) -> Result<Delegation, Nip26Error> {
    conditions.validate()?;
    parse_public_key(delegatee_pubkey)?;

    let cond = conditions.to_query_string();
    let sig = sign_digest(secret_key, delegation_digest(delegatee_pubkey, &cond))?;

    Ok(Delegation {
        from: get_public_key_hex(secret_key)?,
        to: delegatee_pubkey.to_string(),
        cond,
        sig,
    })
}

pub fn verify_delegation(delegation: &Delegation) -> Result<bool, Nip26Error> {
    let digest = delegation_digest(&delegation.to, &delegation.cond);
    Ok(verify_digest(&delegation.from, digest, &delegation.sig)?)
}

fn delegation_digest(delegatee_pubkey: &str, cond: &str) -> [u8; 32] {
    let hash = Sha256::digest(format!("nostr:delegation:{delegatee_pubkey}:{cond}").as_bytes());
    let mut digest = [0_u8; 32];
    digest.copy_from_slice(&hash);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nip01::generate_secret_key;

    #[test]
    fn query_string_orders_conditions() {
        let conditions = Conditions {
            kind: Some(1),
            since: Some(1_700_000_000),
            until: Some(1_700_086_400),
        };
        assert_eq!(
            conditions.to_query_string(),
            "kind=1&created_at>1700000000&created_at<1700086400"
        );
        assert_eq!(Conditions::default().to_query_string(), "");
    }

    #[test]
    fn delegation_round_trips_through_verification() -> Result<(), Nip26Error> {
        let delegator = generate_secret_key();
        let delegatee = get_public_key_hex(&generate_secret_key())?;
        let conditions = Conditions {
            kind: Some(1),
            since: None,
            until: Some(1_900_000_000),
        };

        let delegation = create_delegation(&delegator, &delegatee, &conditions)?;
        assert_eq!(delegation.from, get_public_key_hex(&delegator)?);
        assert_eq!(delegation.to, delegatee);
        assert!(verify_delegation(&delegation)?);

        let widened = Delegation {
            cond: "kind=1".to_string(),
            ..delegation
        };
        assert!(!verify_delegation(&widened)?);
        Ok(())
    }

    #[test]
    fn inverted_window_is_rejected() -> Result<(), Nip26Error> {
        let delegatee = get_public_key_hex(&generate_secret_key())?;
        let conditions = Conditions {
            kind: None,
            since: Some(20),
            until: Some(10),
        };
        assert!(matches!(
            create_delegation(&generate_secret_key(), &delegatee, &conditions),
            Err(Nip26Error::InvalidConditions(_))
        ));
        Ok(())
    }
}
