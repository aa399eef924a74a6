use rst_common::standard::chrono::{DateTime, Utc};
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json::Value;
use rst_common::standard::uuid::Uuid;

/// `~thread` decorator, correlates all messages of a single protocol instance
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(crate = "self::serde")]
pub struct Thread {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pthid: Option<String>,
}

impl Thread {
    pub fn new(thid: Option<String>, pthid: Option<String>) -> Self {
        Self { thid, pthid }
    }
}

/// `~transport` decorator, only the `return_route` hint is supported
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(crate = "self::serde")]
pub struct TransportDecorator {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_route: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(crate = "self::serde")]
pub struct AttachmentData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub jws: Option<Value>,
}

/// `Attachment` is the `~attach` item shared by the handshake and pickup protocols
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct Attachment {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "mime-type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastmod_time: Option<DateTime<Utc>>,

    pub data: AttachmentData,
}

impl Attachment {
    pub fn from_json(id: Option<String>, json: Value) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            mime_type: Some("application/json".to_string()),
            lastmod_time: None,
            data: AttachmentData {
                json: Some(json),
                ..Default::default()
            },
        }
    }

    pub fn from_base64(base64: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mime_type: Some("application/json".to_string()),
            lastmod_time: None,
            data: AttachmentData {
                base64: Some(base64),
                ..Default::default()
            },
        }
    }

    pub fn with_lastmod_time(mut self, time: DateTime<Utc>) -> Self {
        self.lastmod_time = Some(time);
        self
    }
}
