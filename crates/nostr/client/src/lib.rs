//! Minimal Nostr relay client transport.
//!
//! This crate intentionally exposes a small surface:
//! - one WebSocket connection per relay URL
//! - NIP-01 REQ filters and channel-backed subscriptions
//! - publish with relay `OK` acknowledgement

pub mod error;
pub mod filter;
pub mod relay;
pub mod subscription;

pub use error::{ClientError, Result};
pub use filter::Filter;
pub use relay::{ConnectionState, PublishConfirmation, RelayConfig, RelayConnection, RelayMessage};
pub use subscription::{SUBSCRIPTION_CHANNEL_CAPACITY, Subscription};
