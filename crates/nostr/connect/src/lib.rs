//! NostrConnect remote signing over a Nostr relay.
//!
//! An application pairs with a remote signer through a `nostrconnect://` URI and then
//! asks it to sign, delegate, or encrypt over kind-24133 envelopes. Calls are
//! correlated by request id and bounded by a deadline; the responder side routes
//! decoded requests through a typed [`ConnectHandler`].

pub mod codec;
pub mod config;
pub mod delegation;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod method;
pub mod rpc;
pub mod session;
pub mod signer;
pub mod transport;
pub mod uri;

pub use codec::{KIND_NOSTR_CONNECT, Request, Response};
pub use config::{ConfigError, ConnectConfig};
pub use delegation::{DelegationConditions, TimeBound, TimeRange};
pub use dispatch::{ConnectHandler, RequestContext, handle_request};
pub use error::{ConnectError, Result};
pub use memory::MemoryRelay;
pub use method::Method;
pub use rpc::{CallOptions, ListenHandle, NostrRpc};
pub use session::{DisconnectPolicy, Nip04, Session, SessionEvent, SessionState};
pub use signer::KeySigner;
pub use transport::{Connector, RelayConnector, Transport};
pub use uri::{ConnectUri, Metadata};
