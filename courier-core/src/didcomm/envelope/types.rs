use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;
use rst_common::with_errors::thiserror::{self, Error};

use rstdev_domain::entity::ToJSON;
use rstdev_domain::BaseError;

use crate::wallet::crypto;

pub const ENVELOPE_ENC: &str = "chacha20poly1305_ietf";
pub const ENVELOPE_TYP: &str = "JWM/1.0";

/// Opaque message used for every unpack failure, the caller must not learn which check failed
pub const UNPACK_FAILURE: &str = "unable to process message";

#[derive(Debug, PartialEq, Error)]
pub enum EnvelopeError {
    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),

    #[error("forward error: {0}")]
    ForwardError(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(crate = "self::serde")]
pub enum Algorithm {
    Authcrypt,
    Anoncrypt,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct RecipientHeader {
    pub kid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct Recipient {
    pub encrypted_key: String,
    pub header: RecipientHeader,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct ProtectedHeader {
    pub enc: String,
    pub typ: String,
    pub alg: Algorithm,
    pub recipients: Vec<Recipient>,
}

impl ProtectedHeader {
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        let json = serde_json::to_vec(self)
            .map_err(|err| EnvelopeError::EncryptionError(err.to_string()))?;

        Ok(crypto::b64_encode(&json))
    }

    pub fn decode(protected: &str) -> Result<Self, EnvelopeError> {
        let json = crypto::b64_decode(protected)
            .map_err(|err| EnvelopeError::MalformedEnvelope(err.to_string()))?;

        serde_json::from_slice(&json)
            .map_err(|err| EnvelopeError::MalformedEnvelope(err.to_string()))
    }
}

/// `Envelope` is the encrypted wire artifact exchanged between agents
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct Envelope {
    pub protected: String,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
}

impl Envelope {
    pub fn protected_header(&self) -> Result<ProtectedHeader, EnvelopeError> {
        ProtectedHeader::decode(&self.protected)
    }

    /// `recipient_keys` lists the `kid` of every recipient header
    pub fn recipient_keys(&self) -> Result<Vec<String>, EnvelopeError> {
        let header = self.protected_header()?;
        Ok(header
            .recipients
            .iter()
            .map(|recipient| recipient.header.kid.clone())
            .collect())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|err| EnvelopeError::MalformedEnvelope(err.to_string()))
    }
}

impl ToJSON for Envelope {
    fn to_json(&self) -> Result<String, BaseError> {
        let json_str =
            serde_json::to_string(&self).map_err(|err| BaseError::ToJSONError(err.to_string()))?;

        Ok(json_str)
    }
}

impl TryFrom<Vec<u8>> for Envelope {
    type Error = EnvelopeError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        serde_json::from_slice(&value)
            .map_err(|err| EnvelopeError::MalformedEnvelope(err.to_string()))
    }
}

impl TryInto<Vec<u8>> for Envelope {
    type Error = EnvelopeError;

    fn try_into(self) -> Result<Vec<u8>, Self::Error> {
        self.to_bytes()
    }
}

/// `UnpackedMessage` is the result of a successful unpack
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedMessage {
    pub plaintext: Vec<u8>,
    pub recipient_key: String,
    pub sender_key: Option<String>,
}

/// `ForwardHop` is the result of unwrapping a single forward layer
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardHop {
    pub next_hop: String,
    pub inner: Envelope,
}
