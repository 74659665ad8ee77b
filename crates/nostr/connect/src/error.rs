//! Error types for the NostrConnect RPC layer.

use std::time::Duration;

use nostr::Nip01Error;
use nostr_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("malformed pairing uri: {0}")]
    MalformedUri(String),

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("decoding failed: {0}")]
    Decoding(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error text returned by the remote responder, passed through verbatim.
    #[error("{0}")]
    Remote(String),

    #[error("not connected to a remote signer")]
    NotConnected,

    #[error("invalid delegation condition: {0}")]
    InvalidCondition(String),

    #[error("failed to disconnect: {0}")]
    Disconnect(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Failure raised by a local method handler; becomes the response `error` text.
    #[error("{0}")]
    Handler(String),

    #[error("transport error: {0}")]
    Transport(#[from] ClientError),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("nostr error: {0}")]
    Nostr(#[from] Nip01Error),
}

impl ConnectError {
    /// Stable short code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedUri(_) => "malformed_uri",
            Self::Encoding(_) => "encoding",
            Self::Decoding(_) => "decoding",
            Self::Protocol(_) => "protocol",
            Self::Remote(_) => "remote",
            Self::NotConnected => "not_connected",
            Self::InvalidCondition(_) => "invalid_condition",
            Self::Disconnect(_) => "disconnect",
            Self::Timeout(_) => "timeout",
            Self::UnsupportedMethod(_) => "unsupported_method",
            Self::InvalidParams(_) => "invalid_params",
            Self::Handler(_) => "handler",
            Self::Transport(_) => "transport",
            Self::ChannelClosed(_) => "channel_closed",
            Self::Serialization(_) => "serialization",
            Self::Nostr(_) => "nostr",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectError>;
