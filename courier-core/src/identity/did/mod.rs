//! `did` provides the `DID` document model exchanged during the handshake and the helpers to
//! move between raw verkeys and `did:key` identifiers.
pub mod types;

mod key;
pub use key::{did_from_verkey, did_key_to_verkey, is_did_key, verkey_to_did_key};
