//! `prople-courier-core` provides the core business logic of the `prople/courier`, a peer-to-peer
//! secure messaging agent following the `DIDComm Messaging (v1)` conventions.
//!
//! The crate is split into these domains:
//!
//! - `wallet`, the abstract key material capability (`Ed25519` keys, `X25519` key agreement)
//! - `didcomm`, the envelope, message types, dispatcher, sender and transport abstractions
//! - `storage`, the generic record store used by all stateful protocols
//! - `identity`, the `DID` documents, out-of-band invitations and the connection handshake
//! - `routing`, mediation coordination, message pickup and the mediator role
//! - `agent`, the composition root which wires everything for a single agent instance
pub mod agent;
pub mod didcomm;
pub mod identity;
pub mod routing;
pub mod storage;
pub mod wallet;
