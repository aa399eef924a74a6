//! `identity` owns everything related to who the peers are and how they get connected:
//!
//! - `did`, `DID` documents and the `did:key` encoding of verkeys
//! - `oob`, out-of-band invitations, the entry point of every relationship
//! - `connection`, the connection handshake engine and trust ping
pub mod connection;
pub mod did;
pub mod oob;
