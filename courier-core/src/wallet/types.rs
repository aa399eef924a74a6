use rst_common::standard::async_trait::async_trait;
use rst_common::with_errors::thiserror::{self, Error};

/// `WalletError` provides all specific error types relate with key management
/// and cryptographic operations
#[derive(Debug, PartialEq, Error)]
pub enum WalletError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("signing error: {0}")]
    SignError(String),

    #[error("key agreement error: {0}")]
    KeyAgreementError(String),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),
}

/// `Wallet` is a trait behavior used as the only gateway to the secret key material
///
/// All keys are identified by their `base58` encoded `Ed25519` public key. The key agreement
/// converts both sides to `X25519` and returns an already derived symmetric key, so the caller
/// never touches the raw shared secret.
#[async_trait]
pub trait Wallet: Clone + Send + Sync {
    /// `create_key` generates and stores a new signing key and returns its verkey
    async fn create_key(&self) -> Result<String, WalletError>;

    async fn has_key(&self, verkey: &str) -> bool;

    async fn sign(&self, verkey: &str, data: &[u8]) -> Result<Vec<u8>, WalletError>;

    async fn verify(
        &self,
        verkey: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, WalletError>;

    /// `key_agreement` runs `X25519` between the local `verkey` and the given peer public key
    /// and returns the symmetric key derived from the shared secret
    async fn key_agreement(
        &self,
        verkey: &str,
        peer_public: [u8; 32],
    ) -> Result<[u8; 32], WalletError>;

    fn generate_nonce(&self) -> String;
}
