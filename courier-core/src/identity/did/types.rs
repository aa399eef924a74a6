use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;
use rst_common::with_errors::thiserror::{self, Error};

use rstdev_domain::entity::ToJSON;
use rstdev_domain::BaseError;

pub const DID_DOC_CONTEXT: &str = "https://w3id.org/did/v1";
pub const VERIFICATION_KEY_TYPE: &str = "Ed25519VerificationKey2018";
pub const DIDCOMM_SERVICE_TYPE: &str = "did-communication";

#[derive(Debug, PartialEq, Clone, Error)]
pub enum DidError {
    #[error("invalid did: {0}")]
    InvalidDid(String),

    #[error("invalid did doc: {0}")]
    InvalidDidDoc(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct VerificationMethod {
    pub id: String,

    #[serde(rename = "type")]
    pub key_type: String,

    pub controller: String,

    #[serde(rename = "publicKeyBase58")]
    pub public_key_base58: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct DidService {
    pub id: String,

    #[serde(rename = "type")]
    pub service_type: String,

    #[serde(default)]
    pub priority: u32,

    #[serde(rename = "recipientKeys", default)]
    pub recipient_keys: Vec<String>,

    #[serde(rename = "routingKeys", default)]
    pub routing_keys: Vec<String>,

    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

/// `ResolvedService` is a delivery target with raw verkeys, whatever the source of the service
/// was (a `DID` document or an out-of-band inline service)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct ResolvedService {
    pub id: String,
    pub service_endpoint: String,
    pub recipient_keys: Vec<String>,
    pub routing_keys: Vec<String>,
}

/// `DidDoc` is the peer `DID` document exchanged in the connection handshake
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct DidDoc {
    #[serde(rename = "@context")]
    pub context: String,

    pub id: String,

    #[serde(default)]
    pub authentication: Vec<VerificationMethod>,

    #[serde(default)]
    pub service: Vec<DidService>,
}

impl DidDoc {
    /// `new` builds a document with a single authentication key and one service per endpoint,
    /// the endpoint order is the service priority
    pub fn new(did: &str, verkey: &str, endpoints: &[String], routing_keys: &[String]) -> Self {
        let authentication = vec![VerificationMethod {
            id: format!("{}#1", did),
            key_type: VERIFICATION_KEY_TYPE.to_string(),
            controller: did.to_string(),
            public_key_base58: verkey.to_string(),
        }];

        let service = endpoints
            .iter()
            .enumerate()
            .map(|(idx, endpoint)| DidService {
                id: format!("{}#didcomm-{}", did, idx),
                service_type: DIDCOMM_SERVICE_TYPE.to_string(),
                priority: idx as u32,
                recipient_keys: vec![verkey.to_string()],
                routing_keys: routing_keys.to_vec(),
                service_endpoint: endpoint.to_string(),
            })
            .collect();

        Self {
            context: DID_DOC_CONTEXT.to_string(),
            id: did.to_string(),
            authentication,
            service,
        }
    }

    pub fn validate(&self) -> Result<(), DidError> {
        if self.id.is_empty() {
            return Err(DidError::InvalidDidDoc("id was missing".to_string()));
        }

        if self.authentication.is_empty() {
            return Err(DidError::InvalidDidDoc(
                "authentication key was missing".to_string(),
            ));
        }

        if self.service.is_empty() {
            return Err(DidError::InvalidDidDoc("service was missing".to_string()));
        }

        Ok(())
    }

    pub fn verkey(&self) -> Option<String> {
        self.authentication
            .first()
            .map(|method| method.public_key_base58.clone())
    }

    /// `services` lists the `did-communication` services ordered by priority
    pub fn services(&self) -> Vec<ResolvedService> {
        let mut services: Vec<&DidService> = self
            .service
            .iter()
            .filter(|service| service.service_type == DIDCOMM_SERVICE_TYPE)
            .collect();

        services.sort_by_key(|service| service.priority);
        services
            .into_iter()
            .map(|service| ResolvedService {
                id: service.id.clone(),
                service_endpoint: service.service_endpoint.clone(),
                recipient_keys: service.recipient_keys.clone(),
                routing_keys: service.routing_keys.clone(),
            })
            .collect()
    }
}

impl ToJSON for DidDoc {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(&self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}
