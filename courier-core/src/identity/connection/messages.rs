//! Handshake and trust ping messages of both protocol variants.
use rst_common::standard::serde::{self, Deserialize, Serialize};

use crate::didcomm::message::types::MessageError;
use crate::didcomm::message::{agent_message, AgentMessage, Attachment, MessageHeader};
use crate::identity::did::types::DidDoc;

use super::signature::SignatureDecorator;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct ProblemDescription {
    pub code: String,

    #[serde(default)]
    pub en: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct DidExchangeRequest {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub label: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    pub did: String,

    #[serde(rename = "did_doc~attach", skip_serializing_if = "Option::is_none")]
    pub did_doc_attach: Option<Attachment>,
}

agent_message!(
    DidExchangeRequest,
    "https://didcomm.org/didexchange/1.1/request",
    |message: &DidExchangeRequest| {
        if message.did.is_empty() {
            return Err(MessageError::ValidationError(
                "request: did was missing".to_string(),
            ));
        }

        if message.header.parent_thread_id().is_none() {
            return Err(MessageError::ValidationError(
                "request: parent thread id was missing".to_string(),
            ));
        }

        Ok(())
    }
);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct DidExchangeResponse {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub did: String,

    #[serde(rename = "did_doc~attach", skip_serializing_if = "Option::is_none")]
    pub did_doc_attach: Option<Attachment>,
}

agent_message!(
    DidExchangeResponse,
    "https://didcomm.org/didexchange/1.1/response",
    |message: &DidExchangeResponse| {
        if message.header.thread.is_none() {
            return Err(MessageError::ValidationError(
                "response: thread was missing".to_string(),
            ));
        }

        Ok(())
    }
);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct DidExchangeComplete {
    #[serde(flatten)]
    pub header: MessageHeader,
}

agent_message!(
    DidExchangeComplete,
    "https://didcomm.org/didexchange/1.1/complete",
    |message: &DidExchangeComplete| {
        if message.header.thread.is_none() {
            return Err(MessageError::ValidationError(
                "complete: thread was missing".to_string(),
            ));
        }

        Ok(())
    }
);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct DidExchangeProblemReport {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub description: ProblemDescription,
}

agent_message!(
    DidExchangeProblemReport,
    "https://didcomm.org/didexchange/1.1/problem_report"
);

/// `LegacyConnection` is the `connection` attribute of the legacy request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct LegacyConnection {
    #[serde(rename = "DID")]
    pub did: String,

    #[serde(rename = "DIDDoc")]
    pub did_doc: DidDoc,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct ConnectionRequest {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub label: String,

    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    pub connection: LegacyConnection,
}

agent_message!(
    ConnectionRequest,
    "https://didcomm.org/connections/1.0/request"
);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct ConnectionResponse {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(rename = "connection~sig")]
    pub connection_sig: SignatureDecorator,
}

agent_message!(
    ConnectionResponse,
    "https://didcomm.org/connections/1.0/response",
    |message: &ConnectionResponse| {
        if message.header.thread.is_none() {
            return Err(MessageError::ValidationError(
                "response: thread was missing".to_string(),
            ));
        }

        Ok(())
    }
);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct ConnectionProblemReport {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub description: ProblemDescription,
}

agent_message!(
    ConnectionProblemReport,
    "https://didcomm.org/connections/1.0/problem_report"
);

/// `ConnectionInvitation` is the legacy invitation, only read from `c_i` invitation urls
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct ConnectionInvitation {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub label: String,

    #[serde(rename = "recipientKeys", default)]
    pub recipient_keys: Vec<String>,

    #[serde(rename = "routingKeys", default)]
    pub routing_keys: Vec<String>,

    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,

    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

agent_message!(
    ConnectionInvitation,
    "https://didcomm.org/connections/1.0/invitation",
    |message: &ConnectionInvitation| {
        if message.recipient_keys.is_empty() {
            return Err(MessageError::ValidationError(
                "invitation: recipient keys were missing".to_string(),
            ));
        }

        Ok(())
    }
);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct TrustPing {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(default = "response_requested_default")]
    pub response_requested: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn response_requested_default() -> bool {
    true
}

agent_message!(TrustPing, "https://didcomm.org/trust_ping/1.0/ping");

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct TrustPingResponse {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

agent_message!(
    TrustPingResponse,
    "https://didcomm.org/trust_ping/1.0/ping_response"
);

impl TrustPing {
    pub fn new(response_requested: bool) -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
            response_requested,
            comment: None,
        }
    }
}

impl TrustPingResponse {
    pub fn reply_to(ping: &TrustPing) -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE).with_thread(Some(ping.thread_id()), None),
            comment: None,
        }
    }
}
