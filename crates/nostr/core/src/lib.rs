pub mod nip01;
#[cfg(feature = "full")]
pub mod nip04;
pub mod nip26;

pub use nip01::{
    Event, EventTemplate, Nip01Error, UnsignedEvent, finalize_event, generate_secret_key,
    get_event_hash, get_public_key, get_public_key_hex, sign_unsigned_event, unix_now_secs,
    validate_event, verify_event,
};
pub use nip26::{Conditions, Delegation, Nip26Error, create_delegation, verify_delegation};
