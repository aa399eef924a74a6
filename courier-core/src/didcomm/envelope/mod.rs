//! `envelope` packs plaintext messages into encrypted envelopes and unpacks them back.
//!
//! The envelope follows the `DIDComm v1` JWE-like layout: a base64url encoded protected header
//! listing one entry per recipient key, and the content encrypted once with a random content
//! encryption key. The [`ForwardWrapper`] builds on the packer to nest envelopes for each
//! routing hop.
pub mod types;

mod packer;
pub use packer::EnvelopePacker;

mod forward;
pub use forward::ForwardWrapper;
