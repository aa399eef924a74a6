//! `messagepickup/1.0` batch messages and `messagepickup/2.0` status, delivery and live mode
//! messages.
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;

use crate::didcomm::envelope::types::Envelope;
use crate::didcomm::message::types::MessageError;
use crate::didcomm::message::{agent_message, AgentMessage, Attachment, MessageHeader};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct BatchPickup {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub batch_size: usize,
}

agent_message!(BatchPickup, "https://didcomm.org/messagepickup/1.0/batch-pickup");

impl BatchPickup {
    pub fn new(batch_size: usize) -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
            batch_size,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct BatchMessage {
    pub id: String,
    pub message: Envelope,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct Batch {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(rename = "messages~attach", default)]
    pub messages: Vec<BatchMessage>,
}

agent_message!(Batch, "https://didcomm.org/messagepickup/1.0/batch");

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct StatusRequest {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_key: Option<String>,
}

agent_message!(StatusRequest, "https://didcomm.org/messagepickup/2.0/status-request");

impl StatusRequest {
    pub fn new() -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
            recipient_key: None,
        }
    }
}

impl Default for StatusRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct Status {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub message_count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_delivery: Option<bool>,
}

agent_message!(Status, "https://didcomm.org/messagepickup/2.0/status");

impl Status {
    pub fn new(message_count: usize, live_delivery: Option<bool>) -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
            message_count,
            recipient_key: None,
            live_delivery,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct DeliveryRequest {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub limit: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_key: Option<String>,
}

agent_message!(
    DeliveryRequest,
    "https://didcomm.org/messagepickup/2.0/delivery-request"
);

impl DeliveryRequest {
    pub fn new(limit: usize) -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
            limit,
            recipient_key: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct Delivery {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_key: Option<String>,

    #[serde(rename = "~attach")]
    pub attachments: Vec<Attachment>,
}

agent_message!(
    Delivery,
    "https://didcomm.org/messagepickup/2.0/delivery",
    |message: &Delivery| {
        if message.attachments.is_empty() {
            return Err(MessageError::ValidationError(
                "delivery: attachments were missing".to_string(),
            ));
        }

        Ok(())
    }
);

impl Delivery {
    /// `new` attaches every envelope as json, the attachment id is the queued message id
    pub fn new(messages: Vec<(String, Envelope)>) -> Result<Self, MessageError> {
        let attachments = messages
            .into_iter()
            .map(|(id, envelope)| {
                serde_json::to_value(envelope)
                    .map(|json| Attachment::from_json(Some(id), json))
                    .map_err(|err| MessageError::JSONError(err.to_string()))
            })
            .collect::<Result<Vec<Attachment>, MessageError>>()?;

        Ok(Self {
            header: MessageHeader::new(Self::TYPE),
            recipient_key: None,
            attachments,
        })
    }

    /// `envelopes` gives each attached envelope with its message id
    pub fn envelopes(&self) -> Result<Vec<(String, Envelope)>, MessageError> {
        self.attachments
            .iter()
            .map(|attachment| {
                let json = attachment.data.json.clone().ok_or(MessageError::ValidationError(
                    format!("delivery: attachment {} has no json", attachment.id),
                ))?;

                serde_json::from_value::<Envelope>(json)
                    .map(|envelope| (attachment.id.clone(), envelope))
                    .map_err(|err| MessageError::MalformedMessage(err.to_string()))
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct MessagesReceived {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub message_id_list: Vec<String>,
}

agent_message!(
    MessagesReceived,
    "https://didcomm.org/messagepickup/2.0/messages-received"
);

impl MessagesReceived {
    pub fn new(message_id_list: Vec<String>) -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
            message_id_list,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct LiveDeliveryChange {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub live_delivery: bool,
}

agent_message!(
    LiveDeliveryChange,
    "https://didcomm.org/messagepickup/2.0/live-delivery-change"
);

impl LiveDeliveryChange {
    pub fn new(live_delivery: bool) -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
            live_delivery,
        }
    }
}
