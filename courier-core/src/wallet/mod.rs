//! `wallet` is the abstract cryptographic capability consumed by the envelope and the
//! handshake signatures. Secret keys never leave the [`types::Wallet`] implementer, callers
//! only work with `base58` encoded `Ed25519` verification keys (verkeys).
pub mod crypto;
pub mod types;

mod local;
pub use local::LocalWallet;
