use std::env;
use std::time::Duration;

use nostr_client::RelayConfig;
use thiserror::Error;

use crate::session::DisconnectPolicy;

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid NOSTR_CONNECT_CALL_TIMEOUT_SECS: {0}")]
    InvalidCallTimeout(String),
    #[error("invalid NOSTR_CONNECT_RELAY_CONNECT_TIMEOUT_SECS: {0}")]
    InvalidRelayConnectTimeout(String),
    #[error("invalid NOSTR_CONNECT_PUBLISH_TIMEOUT_SECS: {0}")]
    InvalidPublishTimeout(String),
    #[error("invalid NOSTR_CONNECT_DISCONNECT_POLICY: {0}")]
    InvalidDisconnectPolicy(String),
}

/// Runtime settings for sessions and their relay channels.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub relay: RelayConfig,
    /// Deadline for outbound calls that wait for a response.
    pub call_timeout: Duration,
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            disconnect_policy: DisconnectPolicy::default(),
        }
    }
}

impl ConnectConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let call_timeout = parse_secs_lookup(
            &lookup,
            "NOSTR_CONNECT_CALL_TIMEOUT_SECS",
            defaults.call_timeout,
            ConfigError::InvalidCallTimeout,
        )?;
        let connect_timeout = parse_secs_lookup(
            &lookup,
            "NOSTR_CONNECT_RELAY_CONNECT_TIMEOUT_SECS",
            defaults.relay.connect_timeout,
            ConfigError::InvalidRelayConnectTimeout,
        )?;
        let publish_timeout = parse_secs_lookup(
            &lookup,
            "NOSTR_CONNECT_PUBLISH_TIMEOUT_SECS",
            defaults.relay.publish_timeout,
            ConfigError::InvalidPublishTimeout,
        )?;
        let disconnect_policy = match lookup("NOSTR_CONNECT_DISCONNECT_POLICY") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(ConfigError::InvalidDisconnectPolicy)?,
            None => defaults.disconnect_policy,
        };

        Ok(Self {
            relay: RelayConfig {
                connect_timeout,
                publish_timeout,
            },
            call_timeout,
            disconnect_policy,
        })
    }
}

fn parse_secs_lookup(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
    invalid: fn(String) -> ConfigError,
) -> Result<Duration, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|error| invalid(format!("{raw:?}: {error}")))?;
    if secs == 0 {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(Duration::from_secs(secs))
}
