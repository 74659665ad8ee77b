use std::fmt;
use std::str::FromStr;

use crate::error::ConnectError;

/// The closed set of NostrConnect methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Connect,
    Disconnect,
    GetPublicKey,
    SignEvent,
    SignPsbt,
    Describe,
    Delegate,
    Nip04Encrypt,
    Nip04Decrypt,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::Connect,
        Method::Disconnect,
        Method::GetPublicKey,
        Method::SignEvent,
        Method::SignPsbt,
        Method::Describe,
        Method::Delegate,
        Method::Nip04Encrypt,
        Method::Nip04Decrypt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Connect => "connect",
            Method::Disconnect => "disconnect",
            Method::GetPublicKey => "get_public_key",
            Method::SignEvent => "sign_event",
            Method::SignPsbt => "sign_psbt",
            Method::Describe => "describe",
            Method::Delegate => "delegate",
            Method::Nip04Encrypt => "nip04_encrypt",
            Method::Nip04Decrypt => "nip04_decrypt",
        }
    }

    /// Number of positional params the method takes.
    pub fn arity(self) -> usize {
        match self {
            Method::Disconnect | Method::GetPublicKey | Method::Describe => 0,
            Method::Connect | Method::SignEvent => 1,
            Method::Delegate | Method::Nip04Encrypt | Method::Nip04Decrypt => 2,
            Method::SignPsbt => 3,
        }
    }
}

impl FromStr for Method {
    type Err = ConnectError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|method| method.as_str() == value)
            .ok_or_else(|| ConnectError::UnsupportedMethod(value.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
