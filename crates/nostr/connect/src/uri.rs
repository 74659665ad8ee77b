//! `nostrconnect://` pairing URIs.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::codec::Request;
use crate::config::ConnectConfig;
use crate::error::{ConnectError, Result};
use crate::method::Method;
use crate::rpc::{CallOptions, NostrRpc};
use crate::transport::Connector;

pub const URI_SCHEME: &str = "nostrconnect";

/// Application metadata advertised in a pairing URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icons: Option<Vec<String>>,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            description: None,
            icons: None,
        }
    }
}

/// Out-of-band pairing offer: who to talk to, where, and on behalf of which app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectUri {
    pub target: String,
    pub relay: String,
    pub metadata: Metadata,
}

impl ConnectUri {
    pub fn new(target: impl Into<String>, relay: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            target: target.into(),
            relay: relay.into(),
            metadata,
        }
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|error| malformed(&error.to_string()))?;
        if url.scheme() != URI_SCHEME {
            return Err(malformed(&format!("unexpected scheme {}", url.scheme())));
        }

        let target = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => url.path().trim_start_matches('/').to_string(),
        };
        if target.is_empty() {
            return Err(malformed("missing target"));
        }

        let query_value = |name: &str| {
            url.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
                .filter(|value| !value.is_empty())
        };
        let relay = query_value("relay").ok_or_else(|| malformed("missing relay"))?;
        let metadata = query_value("metadata").ok_or_else(|| malformed("missing metadata"))?;
        let metadata: Metadata = serde_json::from_str(&metadata)
            .map_err(|error| malformed(&format!("metadata is not valid JSON: {error}")))?;

        Ok(Self {
            target,
            relay,
            metadata,
        })
    }

    /// Accept the offer: tell the target our public key. Does not wait for a reply.
    pub async fn approve(
        &self,
        secret_key: [u8; 32],
        connector: Arc<dyn Connector>,
        config: &ConnectConfig,
    ) -> Result<()> {
        let rpc = NostrRpc::new(&self.relay, secret_key, connector, config.call_timeout)?;
        let public_key = rpc.public_key().to_string();
        notify(&rpc, &self.target, Method::Connect, vec![json!(public_key)]).await
    }

    /// Decline the offer. Does not wait for a reply.
    pub async fn reject(
        &self,
        secret_key: [u8; 32],
        connector: Arc<dyn Connector>,
        config: &ConnectConfig,
    ) -> Result<()> {
        let rpc = NostrRpc::new(&self.relay, secret_key, connector, config.call_timeout)?;
        notify(&rpc, &self.target, Method::Disconnect, vec![]).await
    }
}

async fn notify(rpc: &NostrRpc, target: &str, method: Method, params: Vec<Value>) -> Result<()> {
    let sent = rpc
        .call(target, Request::new(method.as_str(), params), CallOptions::one_way())
        .await;
    let closed = rpc.disconnect_relays().await;
    sent?;
    closed
}

fn malformed(reason: &str) -> ConnectError {
    ConnectError::MalformedUri(reason.to_string())
}

impl FromStr for ConnectUri {
    type Err = ConnectError;

    fn from_str(uri: &str) -> Result<Self> {
        Self::parse(uri)
    }
}

impl fmt::Display for ConnectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metadata = serde_json::to_string(&self.metadata).map_err(|_| fmt::Error)?;
        write!(
            f,
            "{URI_SCHEME}://{}?relay={}&metadata={}",
            self.target,
            urlencoding::encode(&self.relay),
            urlencoding::encode(&metadata)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_relay_and_metadata() -> Result<()> {
        let uri = ConnectUri::parse(
            "nostrconnect://abc123?relay=wss%3A%2F%2Fr.example&metadata=%7B%22name%22%3A%22App%22%7D",
        )?;
        assert_eq!(uri, ConnectUri::new("abc123", "wss://r.example", Metadata::new("App")));
        Ok(())
    }

    #[test]
    fn serialization_round_trips() -> Result<()> {
        let uri = ConnectUri::new(
            "b889ff5b1513b641e2a139f661a661364979c5beee91842f8f0ef42ab558e9d4",
            "wss://relay.example/path?x=1&y=2",
            Metadata {
                name: "Example App & Co".to_string(),
                url: Some("https://app.example".to_string()),
                description: Some("Signs things: quickly?".to_string()),
                icons: Some(vec!["https://app.example/icon.png".to_string()]),
            },
        );
        let rendered = uri.to_string();
        assert!(rendered.starts_with("nostrconnect://b889ff5b"));
        assert!(rendered.contains("relay=wss%3A%2F%2Frelay.example%2Fpath%3Fx%3D1%26y%3D2"));
        assert_eq!(ConnectUri::parse(&rendered)?, uri);

        let minimal = ConnectUri::new("abc", "wss://r.example", Metadata::new("App"));
        assert_eq!(minimal.to_string().parse::<ConnectUri>()?, minimal);
        Ok(())
    }

    #[test]
    fn malformed_uris_are_rejected() {
        struct Case {
            name: &'static str,
            input: &'static str,
            expected_error_fragment: &'static str,
        }

        let cases = [
            Case {
                name: "not a url",
                input: "abc123",
                expected_error_fragment: "malformed pairing uri",
            },
            Case {
                name: "wrong scheme",
                input: "https://abc?relay=wss%3A%2F%2Fr&metadata=%7B%22name%22%3A%22A%22%7D",
                expected_error_fragment: "unexpected scheme",
            },
            Case {
                name: "missing relay",
                input: "nostrconnect://abc?metadata=%7B%22name%22%3A%22A%22%7D",
                expected_error_fragment: "missing relay",
            },
            Case {
                name: "missing metadata",
                input: "nostrconnect://abc?relay=wss%3A%2F%2Fr",
                expected_error_fragment: "missing metadata",
            },
            Case {
                name: "metadata not json",
                input: "nostrconnect://abc?relay=wss%3A%2F%2Fr&metadata=%7Bname",
                expected_error_fragment: "metadata is not valid JSON",
            },
            Case {
                name: "metadata without name",
                input: "nostrconnect://abc?relay=wss%3A%2F%2Fr&metadata=%7B%7D",
                expected_error_fragment: "metadata is not valid JSON",
            },
            Case {
                name: "missing target",
                input: "nostrconnect://?relay=wss%3A%2F%2Fr&metadata=%7B%22name%22%3A%22A%22%7D",
                expected_error_fragment: "malformed pairing uri",
            },
        ];

        for case in cases {
            match ConnectUri::parse(case.input) {
                Ok(uri) => panic!("{}: expected an error, got {uri:?}", case.name),
                Err(error) => {
                    assert!(matches!(error, ConnectError::MalformedUri(_)), "{}", case.name);
                    assert!(
                        error.to_string().contains(case.expected_error_fragment),
                        "{}: '{}' not in '{}'",
                        case.name,
                        case.expected_error_fragment,
                        error
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::{ConnectUri, Metadata};

    const QUERY_TEXT: &str = "[a-zA-Z0-9&?#+%=/:. ]{1,40}";

    prop_compose! {
        fn any_metadata()(
            name in "\\PC{0,24}",
            url in proptest::option::of(QUERY_TEXT),
            description in proptest::option::of("\\PC{0,40}"),
            icons in proptest::option::of(proptest::collection::vec(QUERY_TEXT, 0..3)),
        ) -> Metadata {
            Metadata { name, url, description, icons }
        }
    }

    prop_compose! {
        fn any_uri()(
            target in "[0-9a-f]{64}",
            relay in QUERY_TEXT,
            metadata in any_metadata(),
        ) -> ConnectUri {
            ConnectUri::new(target, relay, metadata)
        }
    }

    proptest! {
        #[test]
        fn rendered_uri_parses_back_to_itself(uri in any_uri()) {
            let rendered = uri.to_string();
            prop_assert!(rendered.starts_with("nostrconnect://"));
            match ConnectUri::parse(&rendered) {
                Ok(parsed) => prop_assert_eq!(parsed, uri),
                Err(error) => prop_assert!(false, "{} failed to parse: {}", rendered, error),
            }
        }
    }
}
