use std::collections::HashMap;
use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use rst_common::standard::async_trait::async_trait;
use rst_common::with_tokio::tokio::sync::RwLock;

use super::crypto::{self, KEY_SIZE};
use super::types::{Wallet, WalletError};

/// `LocalWallet` keeps the `Ed25519` signing keys in memory, indexed by their verkey
#[derive(Clone, Default)]
pub struct LocalWallet {
    keys: Arc<RwLock<HashMap<String, SigningKey>>>,
}

impl LocalWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `import_seed` used to restore a deterministic key from a 32 bytes seed
    pub async fn import_seed(&self, seed: [u8; KEY_SIZE]) -> String {
        let signing = SigningKey::from_bytes(&seed);
        let verkey = crypto::encode_verkey(&signing.verifying_key());

        self.keys.write().await.insert(verkey.clone(), signing);
        verkey
    }

    async fn signing_key(&self, verkey: &str) -> Result<SigningKey, WalletError> {
        self.keys
            .read()
            .await
            .get(verkey)
            .cloned()
            .ok_or(WalletError::KeyNotFound(verkey.to_string()))
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    async fn create_key(&self) -> Result<String, WalletError> {
        Ok(self.import_seed(crypto::random_bytes::<KEY_SIZE>()).await)
    }

    async fn has_key(&self, verkey: &str) -> bool {
        self.keys.read().await.contains_key(verkey)
    }

    async fn sign(&self, verkey: &str, data: &[u8]) -> Result<Vec<u8>, WalletError> {
        let signing = self.signing_key(verkey).await?;
        Ok(signing.sign(data).to_bytes().to_vec())
    }

    async fn verify(
        &self,
        verkey: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, WalletError> {
        crypto::verify_signature(verkey, data, signature)
    }

    async fn key_agreement(
        &self,
        verkey: &str,
        peer_public: [u8; 32],
    ) -> Result<[u8; 32], WalletError> {
        let signing = self.signing_key(verkey).await?;
        let secret = X25519StaticSecret::from(signing.to_scalar_bytes());

        let shared = secret.diffie_hellman(&X25519PublicKey::from(peer_public));
        if !shared.was_contributory() {
            return Err(WalletError::KeyAgreementError(
                "non contributory shared secret".to_string(),
            ));
        }

        Ok(crypto::derive_key(shared.as_bytes()))
    }

    fn generate_nonce(&self) -> String {
        bs58::encode(crypto::random_bytes::<16>()).into_string()
    }
}
