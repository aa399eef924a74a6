use rst_common::with_logging::log::debug;

use crate::wallet::crypto::{self, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::wallet::types::{Wallet, WalletError};

use super::types::{
    Algorithm, Envelope, EnvelopeError, ProtectedHeader, Recipient, RecipientHeader,
    UnpackedMessage, ENVELOPE_ENC, ENVELOPE_TYP, UNPACK_FAILURE,
};

/// `EnvelopePacker` is the key agreement envelope. It holds no state other than the wallet
/// handle, all secret key operations are delegated to the wallet.
#[derive(Clone)]
pub struct EnvelopePacker<TWallet>
where
    TWallet: Wallet,
{
    wallet: TWallet,
}

impl<TWallet> EnvelopePacker<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(wallet: TWallet) -> Self {
        Self { wallet }
    }

    /// `pack` encrypts `plaintext` for every key in `recipient_keys`
    ///
    /// With a `sender_key` the envelope is `Authcrypt`: each content key wrap is bound to the
    /// sender through key agreement and the sender verkey is sealed to the recipient. Without
    /// it the envelope is `Anoncrypt` and the content key is sealed with an ephemeral key.
    pub async fn pack(
        &self,
        plaintext: &[u8],
        recipient_keys: &[String],
        sender_key: Option<&str>,
    ) -> Result<Envelope, EnvelopeError> {
        if recipient_keys.is_empty() {
            return Err(EnvelopeError::EncryptionError(
                "recipient keys were missing".to_string(),
            ));
        }

        let cek = crypto::random_bytes::<KEY_SIZE>();
        let mut recipients = Vec::with_capacity(recipient_keys.len());

        for recipient_key in recipient_keys {
            let recipient = self
                .wrap_content_key(&cek, recipient_key, sender_key)
                .await
                .map_err(|err| EnvelopeError::EncryptionError(err.to_string()))?;

            recipients.push(recipient);
        }

        let alg = match sender_key {
            Some(_) => Algorithm::Authcrypt,
            None => Algorithm::Anoncrypt,
        };

        let protected = ProtectedHeader {
            enc: ENVELOPE_ENC.to_string(),
            typ: ENVELOPE_TYP.to_string(),
            alg,
            recipients,
        }
        .encode()?;

        let iv = crypto::random_bytes::<NONCE_SIZE>();
        let mut encrypted = crypto::aead_encrypt(&cek, &iv, plaintext, protected.as_bytes())
            .map_err(|err| EnvelopeError::EncryptionError(err.to_string()))?;

        let tag = encrypted.split_off(encrypted.len() - TAG_SIZE);

        Ok(Envelope {
            protected,
            iv: crypto::b64_encode(&iv),
            ciphertext: crypto::b64_encode(&encrypted),
            tag: crypto::b64_encode(&tag),
        })
    }

    async fn wrap_content_key(
        &self,
        cek: &[u8; KEY_SIZE],
        recipient_key: &str,
        sender_key: Option<&str>,
    ) -> Result<Recipient, WalletError> {
        let recipient_public = crypto::verkey_to_x25519(recipient_key)?;

        match sender_key {
            Some(sender) => {
                let wrap_key = self.wallet.key_agreement(sender, recipient_public).await?;
                let iv = crypto::random_bytes::<NONCE_SIZE>();
                let encrypted_key =
                    crypto::aead_encrypt(&wrap_key, &iv, cek, recipient_key.as_bytes())?;

                let sealed_sender = crypto::seal(&recipient_public, sender.as_bytes())?;

                Ok(Recipient {
                    encrypted_key: crypto::b64_encode(&encrypted_key),
                    header: RecipientHeader {
                        kid: recipient_key.to_string(),
                        sender: Some(crypto::b64_encode(&sealed_sender)),
                        iv: Some(crypto::b64_encode(&iv)),
                    },
                })
            }
            None => {
                let sealed_key = crypto::seal(&recipient_public, cek)?;

                Ok(Recipient {
                    encrypted_key: crypto::b64_encode(&sealed_key),
                    header: RecipientHeader {
                        kid: recipient_key.to_string(),
                        sender: None,
                        iv: None,
                    },
                })
            }
        }
    }

    /// `unpack` decrypts the envelope with the first recipient key held by the wallet
    ///
    /// Every failure is reported with the same [`UNPACK_FAILURE`] message.
    pub async fn unpack(&self, envelope: &Envelope) -> Result<UnpackedMessage, EnvelopeError> {
        let header = envelope
            .protected_header()
            .map_err(|_| EnvelopeError::DecryptionError(UNPACK_FAILURE.to_string()))?;

        for recipient in header.recipients.iter() {
            if !self.wallet.has_key(&recipient.header.kid).await {
                continue;
            }

            return self
                .open_with_recipient(envelope, header.alg, recipient)
                .await
                .map_err(|err| {
                    debug!("envelope rejected for {}: {}", recipient.header.kid, err);
                    EnvelopeError::DecryptionError(UNPACK_FAILURE.to_string())
                });
        }

        Err(EnvelopeError::DecryptionError(UNPACK_FAILURE.to_string()))
    }

    async fn open_with_recipient(
        &self,
        envelope: &Envelope,
        alg: Algorithm,
        recipient: &Recipient,
    ) -> Result<UnpackedMessage, WalletError> {
        let kid = recipient.header.kid.as_str();
        let encrypted_key = crypto::b64_decode(&recipient.encrypted_key)?;

        let (cek_bytes, sender_key) = match alg {
            Algorithm::Anoncrypt => (self.open_sealed(kid, &encrypted_key).await?, None),
            Algorithm::Authcrypt => {
                let sealed_sender = recipient
                    .header
                    .sender
                    .as_ref()
                    .ok_or(WalletError::DecryptionError("sender missing".to_string()))?;

                let iv = recipient
                    .header
                    .iv
                    .as_ref()
                    .ok_or(WalletError::DecryptionError("iv missing".to_string()))
                    .and_then(|iv| crypto::b64_decode(iv))?;

                let sender_bytes = self
                    .open_sealed(kid, &crypto::b64_decode(sealed_sender)?)
                    .await?;

                let sender = String::from_utf8(sender_bytes)
                    .map_err(|err| WalletError::DecryptionError(err.to_string()))?;

                let sender_public = crypto::verkey_to_x25519(&sender)?;
                let wrap_key = self.wallet.key_agreement(kid, sender_public).await?;
                let cek = crypto::aead_decrypt(&wrap_key, &iv, &encrypted_key, kid.as_bytes())?;

                (cek, Some(sender))
            }
        };

        let cek: [u8; KEY_SIZE] = cek_bytes
            .try_into()
            .map_err(|_| WalletError::DecryptionError("invalid content key".to_string()))?;

        let iv = crypto::b64_decode(&envelope.iv)?;
        let mut ciphertext = crypto::b64_decode(&envelope.ciphertext)?;
        ciphertext.extend_from_slice(&crypto::b64_decode(&envelope.tag)?);

        let plaintext =
            crypto::aead_decrypt(&cek, &iv, &ciphertext, envelope.protected.as_bytes())?;

        Ok(UnpackedMessage {
            plaintext,
            recipient_key: kid.to_string(),
            sender_key,
        })
    }

    async fn open_sealed(&self, verkey: &str, sealed: &[u8]) -> Result<Vec<u8>, WalletError> {
        let (ephemeral, nonce, ciphertext) = crypto::split_sealed(sealed)?;
        let key = self.wallet.key_agreement(verkey, ephemeral).await?;
        crypto::aead_decrypt(&key, nonce, ciphertext, &ephemeral)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    use rst_common::standard::async_trait::async_trait;
    use rst_common::with_tokio::tokio;

    use crate::wallet::LocalWallet;

    mock!(
        FakeWallet{}

        impl Clone for FakeWallet {
            fn clone(&self) -> Self;
        }

        #[async_trait]
        impl Wallet for FakeWallet {
            async fn create_key(&self) -> Result<String, WalletError>;
            async fn has_key(&self, verkey: &str) -> bool;
            async fn sign(&self, verkey: &str, data: &[u8]) -> Result<Vec<u8>, WalletError>;
            async fn verify(
                &self,
                verkey: &str,
                data: &[u8],
                signature: &[u8],
            ) -> Result<bool, WalletError>;
            async fn key_agreement(
                &self,
                verkey: &str,
                peer_public: [u8; 32],
            ) -> Result<[u8; 32], WalletError>;
            fn generate_nonce(&self) -> String;
        }
    );

    async fn generate_keys(wallet: &LocalWallet, total: usize) -> Vec<String> {
        let mut keys = Vec::new();
        for _ in 0..total {
            keys.push(wallet.create_key().await.unwrap());
        }

        keys
    }

    #[tokio::test]
    async fn test_anoncrypt_roundtrip() {
        let sender_wallet = LocalWallet::new();
        let recipient_wallet = LocalWallet::new();
        let recipient_keys = generate_keys(&recipient_wallet, 1).await;

        let packer = EnvelopePacker::new(sender_wallet);
        let envelope = packer
            .pack(b"{\"hello\":\"world\"}", &recipient_keys, None)
            .await
            .unwrap();

        let header = envelope.protected_header().unwrap();
        assert_eq!(header.alg, Algorithm::Anoncrypt);
        assert!(header.recipients[0].header.sender.is_none());

        let unpacker = EnvelopePacker::new(recipient_wallet);
        let unpacked = unpacker.unpack(&envelope).await.unwrap();
        assert_eq!(unpacked.plaintext, b"{\"hello\":\"world\"}".to_vec());
        assert_eq!(unpacked.recipient_key, recipient_keys[0]);
        assert!(unpacked.sender_key.is_none())
    }

    #[tokio::test]
    async fn test_authcrypt_roundtrip_for_each_recipient() {
        let sender_wallet = LocalWallet::new();
        let sender_key = sender_wallet.create_key().await.unwrap();

        let recipient_wallets = vec![LocalWallet::new(), LocalWallet::new(), LocalWallet::new()];
        let mut recipient_keys = Vec::new();
        for wallet in recipient_wallets.iter() {
            recipient_keys.push(wallet.create_key().await.unwrap());
        }

        let packer = EnvelopePacker::new(sender_wallet);
        let envelope = packer
            .pack(b"secret", &recipient_keys, Some(&sender_key))
            .await
            .unwrap();

        for (idx, wallet) in recipient_wallets.into_iter().enumerate() {
            let unpacked = EnvelopePacker::new(wallet).unpack(&envelope).await.unwrap();
            assert_eq!(unpacked.plaintext, b"secret".to_vec());
            assert_eq!(unpacked.recipient_key, recipient_keys[idx]);
            assert_eq!(unpacked.sender_key, Some(sender_key.clone()));
        }
    }

    #[tokio::test]
    async fn test_unpack_without_matching_key() {
        let sender_wallet = LocalWallet::new();
        let recipient_wallet = LocalWallet::new();
        let recipient_keys = generate_keys(&recipient_wallet, 2).await;

        let envelope = EnvelopePacker::new(sender_wallet)
            .pack(b"secret", &recipient_keys, None)
            .await
            .unwrap();

        let stranger = EnvelopePacker::new(LocalWallet::new());
        let result = stranger.unpack(&envelope).await;
        assert_eq!(
            result.unwrap_err(),
            EnvelopeError::DecryptionError(UNPACK_FAILURE.to_string())
        )
    }

    #[tokio::test]
    async fn test_unpack_tampered_ciphertext_is_opaque() {
        let sender_wallet = LocalWallet::new();
        let sender_key = sender_wallet.create_key().await.unwrap();
        let recipient_wallet = LocalWallet::new();
        let recipient_keys = generate_keys(&recipient_wallet, 1).await;

        let mut envelope = EnvelopePacker::new(sender_wallet)
            .pack(b"secret message", &recipient_keys, Some(&sender_key))
            .await
            .unwrap();

        let mut ciphertext = crypto::b64_decode(&envelope.ciphertext).unwrap();
        ciphertext[0] ^= 0xff;
        envelope.ciphertext = crypto::b64_encode(&ciphertext);

        let result = EnvelopePacker::new(recipient_wallet.clone())
            .unpack(&envelope)
            .await;
        assert_eq!(
            result.unwrap_err(),
            EnvelopeError::DecryptionError(UNPACK_FAILURE.to_string())
        );

        envelope.protected = "bm90LWpzb24".to_string();
        let result = EnvelopePacker::new(recipient_wallet).unpack(&envelope).await;
        assert_eq!(
            result.unwrap_err(),
            EnvelopeError::DecryptionError(UNPACK_FAILURE.to_string())
        )
    }

    #[tokio::test]
    async fn test_pack_without_recipients() {
        let packer = EnvelopePacker::new(LocalWallet::new());
        let result = packer.pack(b"secret", &[], None).await;
        assert!(matches!(
            result.unwrap_err(),
            EnvelopeError::EncryptionError(_)
        ))
    }

    #[tokio::test]
    async fn test_pack_wallet_key_agreement_failure() {
        let recipient_key = LocalWallet::new().create_key().await.unwrap();

        let mut wallet = MockFakeWallet::new();
        wallet
            .expect_key_agreement()
            .times(1)
            .returning(|_, _| Err(WalletError::KeyNotFound("sender".to_string())));

        let packer = EnvelopePacker::new(wallet);
        let result = packer
            .pack(b"secret", &[recipient_key], Some("sender"))
            .await;

        assert!(matches!(
            result.unwrap_err(),
            EnvelopeError::EncryptionError(_)
        ))
    }
}
