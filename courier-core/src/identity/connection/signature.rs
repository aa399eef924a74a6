use rst_common::standard::chrono::Utc;
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json::{self, json, Value};

use crate::didcomm::message::Attachment;
use crate::identity::did::{did_key_to_verkey, verkey_to_did_key};
use crate::wallet::crypto;
use crate::wallet::types::{Wallet, WalletError};

pub const SIGNATURE_TYPE: &str = "https://didcomm.org/signature/1.0/ed25519Sha512_single";

const TIMESTAMP_SIZE: usize = 8;

/// `SignatureDecorator` is the legacy `~sig` decorator: the signed data is an 8 bytes big
/// endian timestamp followed by the JSON payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct SignatureDecorator {
    #[serde(rename = "@type")]
    pub sig_type: String,
    pub signature: String,
    pub sig_data: String,
    pub signer: String,
}

impl SignatureDecorator {
    pub async fn sign<TWallet: Wallet>(
        wallet: &TWallet,
        data: &Value,
        signer: &str,
    ) -> Result<Self, WalletError> {
        let timestamp = Utc::now().timestamp().max(0) as u64;

        let mut sig_data = timestamp.to_be_bytes().to_vec();
        let json =
            serde_json::to_vec(data).map_err(|err| WalletError::SignError(err.to_string()))?;
        sig_data.extend_from_slice(&json);

        let signature = wallet.sign(signer, &sig_data).await?;
        Ok(Self {
            sig_type: SIGNATURE_TYPE.to_string(),
            signature: crypto::b64_encode(&signature),
            sig_data: crypto::b64_encode(&sig_data),
            signer: signer.to_string(),
        })
    }

    /// `verify` checks the signature and returns the signed payload
    pub fn verify(&self) -> Result<Value, WalletError> {
        let sig_data = crypto::b64_decode(&self.sig_data)?;
        let signature = crypto::b64_decode(&self.signature)?;

        if !crypto::verify_signature(&self.signer, &sig_data, &signature)? {
            return Err(WalletError::SignError("invalid signature".to_string()));
        }

        if sig_data.len() <= TIMESTAMP_SIZE {
            return Err(WalletError::SignError("signed data too short".to_string()));
        }

        serde_json::from_slice(&sig_data[TIMESTAMP_SIZE..])
            .map_err(|err| WalletError::SignError(err.to_string()))
    }
}

/// `sign_attachment` adds a detached JWS over the base64 attachment data
pub async fn sign_attachment<TWallet: Wallet>(
    wallet: &TWallet,
    attachment: Attachment,
    verkey: &str,
) -> Result<Attachment, WalletError> {
    let payload = attachment
        .data
        .base64
        .clone()
        .ok_or(WalletError::SignError("attachment has no base64 data".to_string()))?;

    let kid = verkey_to_did_key(verkey).map_err(|err| WalletError::InvalidKey(err.to_string()))?;
    let raw_key = bs58::decode(verkey)
        .into_vec()
        .map_err(|err| WalletError::InvalidKey(err.to_string()))?;

    let protected_header = json!({
        "alg": "EdDSA",
        "kid": kid,
        "jwk": {
            "kty": "OKP",
            "crv": "Ed25519",
            "x": crypto::b64_encode(&raw_key),
        },
    });

    let protected = crypto::b64_encode(
        &serde_json::to_vec(&protected_header)
            .map_err(|err| WalletError::SignError(err.to_string()))?,
    );

    let signing_input = format!("{}.{}", protected, payload);
    let signature = wallet.sign(verkey, signing_input.as_bytes()).await?;

    let mut signed = attachment;
    signed.data.jws = Some(json!({
        "header": {"kid": kid},
        "protected": protected,
        "signature": crypto::b64_encode(&signature),
    }));

    Ok(signed)
}

/// `verify_attachment` checks the JWS of a signed attachment and returns the signer verkey
/// with the decoded payload
pub fn verify_attachment(attachment: &Attachment) -> Result<(String, Vec<u8>), WalletError> {
    let payload = attachment
        .data
        .base64
        .as_ref()
        .ok_or(WalletError::SignError("attachment has no base64 data".to_string()))?;

    let jws = attachment
        .data
        .jws
        .as_ref()
        .ok_or(WalletError::SignError("attachment is not signed".to_string()))?;

    let protected = jws["protected"]
        .as_str()
        .ok_or(WalletError::SignError("jws protected missing".to_string()))?;

    let signature = jws["signature"]
        .as_str()
        .ok_or(WalletError::SignError("jws signature missing".to_string()))
        .and_then(crypto::b64_decode)?;

    let kid = match jws["header"]["kid"].as_str() {
        Some(kid) => kid.to_string(),
        None => {
            let header: Value = serde_json::from_slice(&crypto::b64_decode(protected)?)
                .map_err(|err| WalletError::SignError(err.to_string()))?;

            header["kid"]
                .as_str()
                .map(|kid| kid.to_string())
                .ok_or(WalletError::SignError("jws kid missing".to_string()))?
        }
    };

    let signer = did_key_to_verkey(&kid).map_err(|err| WalletError::InvalidKey(err.to_string()))?;
    let signing_input = format!("{}.{}", protected, payload);

    if !crypto::verify_signature(&signer, signing_input.as_bytes(), &signature)? {
        return Err(WalletError::SignError("invalid signature".to_string()));
    }

    Ok((signer, crypto::b64_decode(payload)?))
}
