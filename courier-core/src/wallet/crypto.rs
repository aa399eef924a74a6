//! Stateless primitives shared by the wallet and the envelope packer.
//!
//! Symmetric encryption is `ChaCha20-Poly1305` with a 12 bytes random nonce, key agreement is
//! `X25519` over keys converted from `Ed25519`, and every shared secret goes through
//! `blake3::derive_key` before being used as an encryption key.
//!
//! Sealed box format: `[ephemeral public key (32)] + [nonce (12)] + [ciphertext + tag]`
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use super::types::WalletError;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const KDF_CONTEXT: &str = "prople-courier 2024 envelope key agreement v1";

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn derive_key(shared_secret: &[u8]) -> [u8; KEY_SIZE] {
    blake3::derive_key(KDF_CONTEXT, shared_secret)
}

pub fn b64_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn b64_decode(data: &str) -> Result<Vec<u8>, WalletError> {
    URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|err| WalletError::DecryptionError(err.to_string()))
}

pub fn decode_verkey(verkey: &str) -> Result<VerifyingKey, WalletError> {
    let bytes = bs58::decode(verkey)
        .into_vec()
        .map_err(|err| WalletError::InvalidKey(err.to_string()))?;

    let key_bytes: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| WalletError::InvalidKey(format!("verkey length mismatch: {}", verkey)))?;

    VerifyingKey::from_bytes(&key_bytes).map_err(|err| WalletError::InvalidKey(err.to_string()))
}

pub fn encode_verkey(key: &VerifyingKey) -> String {
    bs58::encode(key.to_bytes()).into_string()
}

/// `verkey_to_x25519` converts an `Ed25519` verkey into its birationally equivalent
/// `X25519` public key
pub fn verkey_to_x25519(verkey: &str) -> Result<[u8; KEY_SIZE], WalletError> {
    let key = decode_verkey(verkey)?;
    Ok(key.to_montgomery().to_bytes())
}

pub fn verify_signature(verkey: &str, data: &[u8], signature: &[u8]) -> Result<bool, WalletError> {
    let key = decode_verkey(verkey)?;
    let signature =
        Signature::from_slice(signature).map_err(|err| WalletError::SignError(err.to_string()))?;

    Ok(key.verify(data, &signature).is_ok())
}

pub fn aead_encrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, WalletError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|err| WalletError::EncryptionError(err.to_string()))
}

pub fn aead_decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, WalletError> {
    if nonce.len() != NONCE_SIZE {
        return Err(WalletError::DecryptionError(
            "invalid nonce length".to_string(),
        ));
    }

    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|err| WalletError::DecryptionError(err.to_string()))
}

/// `seal` encrypts `message` anonymously to the given `X25519` public key using a fresh
/// ephemeral key pair
pub fn seal(recipient_public: &[u8; KEY_SIZE], message: &[u8]) -> Result<Vec<u8>, WalletError> {
    let ephemeral_secret = X25519StaticSecret::from(random_bytes::<KEY_SIZE>());
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let shared = ephemeral_secret.diffie_hellman(&X25519PublicKey::from(*recipient_public));
    if !shared.was_contributory() {
        return Err(WalletError::KeyAgreementError(
            "non contributory shared secret".to_string(),
        ));
    }

    let key = derive_key(shared.as_bytes());
    let nonce = random_bytes::<NONCE_SIZE>();
    let ciphertext = aead_encrypt(&key, &nonce, message, ephemeral_public.as_bytes())?;

    let mut sealed = Vec::with_capacity(KEY_SIZE + NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    Ok(sealed)
}

/// `split_sealed` returns the ephemeral public key, the nonce and the ciphertext of a sealed box
pub fn split_sealed(sealed: &[u8]) -> Result<([u8; KEY_SIZE], &[u8], &[u8]), WalletError> {
    if sealed.len() < KEY_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(WalletError::DecryptionError(
            "sealed box too short".to_string(),
        ));
    }

    let mut ephemeral = [0u8; KEY_SIZE];
    ephemeral.copy_from_slice(&sealed[..KEY_SIZE]);

    let nonce = &sealed[KEY_SIZE..KEY_SIZE + NONCE_SIZE];
    let ciphertext = &sealed[KEY_SIZE + NONCE_SIZE..];
    Ok((ephemeral, nonce, ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn test_aead_roundtrip_with_aad() {
        let key = random_bytes::<KEY_SIZE>();
        let nonce = random_bytes::<NONCE_SIZE>();

        let encrypted = aead_encrypt(&key, &nonce, b"hello world", b"header").unwrap();
        assert_eq!(encrypted.len(), "hello world".len() + TAG_SIZE);

        let decrypted = aead_decrypt(&key, &nonce, &encrypted, b"header").unwrap();
        assert_eq!(decrypted, b"hello world".to_vec());

        let wrong_aad = aead_decrypt(&key, &nonce, &encrypted, b"other");
        assert!(wrong_aad.is_err());
    }

    #[test]
    fn test_verkey_conversion_matches_scalar() {
        let signing = SigningKey::from_bytes(&random_bytes::<KEY_SIZE>());
        let verkey = encode_verkey(&signing.verifying_key());

        let from_verkey = verkey_to_x25519(&verkey).unwrap();
        let secret = X25519StaticSecret::from(signing.to_scalar_bytes());
        let from_secret = X25519PublicKey::from(&secret);

        assert_eq!(from_verkey, *from_secret.as_bytes())
    }

    #[test]
    fn test_decode_invalid_verkey() {
        let invalid = decode_verkey("not-base58-0OIl");
        assert!(invalid.is_err());

        let short = decode_verkey(&bs58::encode([1u8; 8]).into_string());
        assert!(matches!(short.unwrap_err(), WalletError::InvalidKey(_)))
    }

    #[test]
    fn test_split_sealed_too_short() {
        let result = split_sealed(&[0u8; 10]);
        assert!(result.is_err())
    }
}
