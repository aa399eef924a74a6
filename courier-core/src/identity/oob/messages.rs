use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;

use url::Url;

use crate::didcomm::message::types::MessageError;
use crate::didcomm::message::{agent_message, AgentMessage, MessageHeader};
use crate::identity::connection::messages::ConnectionInvitation;
use crate::identity::connection::types::HandshakeProtocol;
use crate::identity::did::types::{DidError, ResolvedService, DIDCOMM_SERVICE_TYPE};
use crate::identity::did::{did_key_to_verkey, is_did_key, verkey_to_did_key};
use crate::wallet::crypto;

use super::types::{OutOfBandError, URL_PARAM_LEGACY, URL_PARAM_OOB};

/// `InlineService` is a service embedded in the invitation, keys are `did:key` identifiers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct InlineService {
    pub id: String,

    #[serde(rename = "type")]
    pub service_type: String,

    #[serde(rename = "recipientKeys")]
    pub recipient_keys: Vec<String>,

    #[serde(rename = "routingKeys", default)]
    pub routing_keys: Vec<String>,

    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

impl InlineService {
    pub fn new(
        id: &str,
        verkey: &str,
        routing_keys: &[String],
        endpoint: &str,
    ) -> Result<Self, DidError> {
        let routing_keys = routing_keys
            .iter()
            .map(|key| verkey_to_did_key(key))
            .collect::<Result<Vec<String>, DidError>>()?;

        Ok(Self {
            id: id.to_string(),
            service_type: DIDCOMM_SERVICE_TYPE.to_string(),
            recipient_keys: vec![verkey_to_did_key(verkey)?],
            routing_keys,
            service_endpoint: endpoint.to_string(),
        })
    }

    /// `resolve` converts the `did:key` identifiers back into raw verkeys, raw verkeys found in
    /// older invitations are kept as is
    pub fn resolve(&self) -> Result<ResolvedService, DidError> {
        let to_verkey = |key: &String| -> Result<String, DidError> {
            if is_did_key(key) {
                return did_key_to_verkey(key);
            }

            Ok(key.clone())
        };

        Ok(ResolvedService {
            id: self.id.clone(),
            service_endpoint: self.service_endpoint.clone(),
            recipient_keys: self
                .recipient_keys
                .iter()
                .map(to_verkey)
                .collect::<Result<Vec<String>, DidError>>()?,
            routing_keys: self
                .routing_keys
                .iter()
                .map(to_verkey)
                .collect::<Result<Vec<String>, DidError>>()?,
        })
    }
}

/// `OutOfBandService` is either an inline service or a public `DID` reference. Public `DID`s
/// are kept for interoperability but cannot be resolved by this agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde", untagged)]
pub enum OutOfBandService {
    Inline(InlineService),
    Did(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct OutOfBandInvitation {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(default)]
    pub label: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    #[serde(default)]
    pub accept: Vec<String>,

    #[serde(default)]
    pub handshake_protocols: Vec<String>,

    #[serde(default)]
    pub services: Vec<OutOfBandService>,

    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

agent_message!(
    OutOfBandInvitation,
    "https://didcomm.org/out-of-band/1.1/invitation",
    |message: &OutOfBandInvitation| {
        if message.services.is_empty() {
            return Err(MessageError::ValidationError(
                "invitation: services were missing".to_string(),
            ));
        }

        if message.handshake_protocols.is_empty() {
            return Err(MessageError::ValidationError(
                "invitation: handshake protocols were missing".to_string(),
            ));
        }

        Ok(())
    }
);

impl OutOfBandInvitation {
    pub fn new(label: &str, protocols: &[HandshakeProtocol], services: Vec<InlineService>) -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
            label: label.to_string(),
            goal_code: None,
            goal: None,
            accept: vec!["didcomm/aip1".to_string(), "didcomm/aip2;env=rfc19".to_string()],
            handshake_protocols: protocols
                .iter()
                .map(|protocol| protocol.uri().to_string())
                .collect(),
            services: services.into_iter().map(OutOfBandService::Inline).collect(),
            image_url: None,
        }
    }

    /// `from_legacy` converts a `connections/1.0` invitation into its out-of-band form, the
    /// invitation id is kept so the request threads back to it
    pub fn from_legacy(legacy: ConnectionInvitation) -> Result<Self, OutOfBandError> {
        let to_did_key = |key: &String| -> Result<String, OutOfBandError> {
            if is_did_key(key) {
                return Ok(key.clone());
            }

            verkey_to_did_key(key).map_err(|err| OutOfBandError::InvalidInvitation(err.to_string()))
        };

        let service = InlineService {
            id: "#inline".to_string(),
            service_type: DIDCOMM_SERVICE_TYPE.to_string(),
            recipient_keys: legacy
                .recipient_keys
                .iter()
                .map(to_did_key)
                .collect::<Result<Vec<String>, OutOfBandError>>()?,
            routing_keys: legacy
                .routing_keys
                .iter()
                .map(to_did_key)
                .collect::<Result<Vec<String>, OutOfBandError>>()?,
            service_endpoint: legacy.service_endpoint,
        };

        Ok(Self {
            header: MessageHeader {
                id: legacy.header.id,
                ..MessageHeader::new(Self::TYPE)
            },
            label: legacy.label,
            goal_code: None,
            goal: None,
            accept: Vec::new(),
            handshake_protocols: vec![HandshakeProtocol::Connections.uri().to_string()],
            services: vec![OutOfBandService::Inline(service)],
            image_url: legacy.image_url,
        })
    }

    /// `resolved_services` lists the inline services this agent is able to use
    pub fn resolved_services(&self) -> Vec<ResolvedService> {
        self.services
            .iter()
            .filter_map(|service| match service {
                OutOfBandService::Inline(inline) => inline.resolve().ok(),
                OutOfBandService::Did(_) => None,
            })
            .filter(|service| !service.recipient_keys.is_empty())
            .collect()
    }

    pub fn invitation_key(&self) -> Option<String> {
        self.resolved_services()
            .first()
            .and_then(|service| service.recipient_keys.first().cloned())
    }

    /// `supported_protocols` keeps the order of preference of the inviter
    pub fn supported_protocols(&self) -> Vec<HandshakeProtocol> {
        self.handshake_protocols
            .iter()
            .filter_map(|uri| HandshakeProtocol::from_uri(uri))
            .collect()
    }

    pub fn to_url(&self, domain: &str) -> Result<String, OutOfBandError> {
        let json =
            serde_json::to_vec(self).map_err(|err| OutOfBandError::UrlError(err.to_string()))?;

        let mut url = Url::parse(domain).map_err(|err| OutOfBandError::UrlError(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair(URL_PARAM_OOB, &crypto::b64_encode(&json));

        Ok(url.to_string())
    }

    /// `from_url` reads an `oob` invitation or a legacy `c_i` one
    pub fn from_url(invitation_url: &str) -> Result<Self, OutOfBandError> {
        let url =
            Url::parse(invitation_url).map_err(|err| OutOfBandError::UrlError(err.to_string()))?;

        let (param, encoded) = url
            .query_pairs()
            .find(|(key, _)| key == URL_PARAM_OOB || key == URL_PARAM_LEGACY)
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .ok_or(OutOfBandError::UrlError(format!(
                "no invitation in url: {}",
                invitation_url
            )))?;

        let decoded = crypto::b64_decode(&encoded)
            .map_err(|err| OutOfBandError::UrlError(err.to_string()))?;

        let value = serde_json::from_slice(&decoded)
            .map_err(|err| OutOfBandError::InvalidInvitation(err.to_string()))?;

        if param == URL_PARAM_LEGACY {
            let legacy = ConnectionInvitation::from_value(&value)
                .map_err(|err| OutOfBandError::InvalidInvitation(err.to_string()))?;

            return Self::from_legacy(legacy);
        }

        Self::from_value(&value).map_err(|err| OutOfBandError::InvalidInvitation(err.to_string()))
    }
}
