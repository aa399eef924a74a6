use rst_common::standard::serde::de::DeserializeOwned;
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json::{self, Value};
use rst_common::standard::uuid::Uuid;

use super::decorators::{Thread, TransportDecorator};
use super::message_type::MessageType;
use super::types::{MessageError, RETURN_ROUTE_ALL};

/// `MessageHeader` holds the fields shared by every `DIDComm` message
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct MessageHeader {
    #[serde(rename = "@id")]
    pub id: String,

    #[serde(rename = "@type")]
    pub type_uri: String,

    #[serde(rename = "~thread", default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<Thread>,

    #[serde(
        rename = "~transport",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transport: Option<TransportDecorator>,
}

impl MessageHeader {
    pub fn new(type_uri: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            type_uri: type_uri.to_string(),
            thread: None,
            transport: None,
        }
    }

    pub fn with_thread(mut self, thid: Option<String>, pthid: Option<String>) -> Self {
        self.thread = Some(Thread::new(thid, pthid));
        self
    }

    /// `thread_id` falls back to the message id, a message without `~thread` starts its own thread
    pub fn thread_id(&self) -> String {
        self.thread
            .as_ref()
            .and_then(|thread| thread.thid.clone())
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn parent_thread_id(&self) -> Option<String> {
        self.thread.as_ref().and_then(|thread| thread.pthid.clone())
    }

    pub fn has_return_route(&self) -> bool {
        self.transport
            .as_ref()
            .and_then(|transport| transport.return_route.as_deref())
            .map(|route| route == RETURN_ROUTE_ALL)
            .unwrap_or(false)
    }

    pub fn message_type(&self) -> Result<MessageType, MessageError> {
        MessageType::parse(&self.type_uri)
    }

    pub fn from_value(value: &Value) -> Result<Self, MessageError> {
        serde_json::from_value(value.clone())
            .map_err(|err| MessageError::MalformedMessage(err.to_string()))
    }
}

/// `AgentMessage` is the contract implemented by each typed protocol message
pub trait AgentMessage: Serialize + DeserializeOwned + Send + Sync {
    /// The canonical message type URI used when this agent produces the message
    const TYPE: &'static str;

    fn header(&self) -> &MessageHeader;

    fn header_mut(&mut self) -> &mut MessageHeader;

    /// `accepts` decides whether an inbound message type can be mapped into this struct
    fn accepts(message_type: &MessageType) -> bool {
        MessageType::parse(Self::TYPE)
            .map(|own| own.is_compatible(message_type))
            .unwrap_or(false)
    }

    /// `validate` is the field level validation executed after deserialization
    fn validate(&self) -> Result<(), MessageError> {
        Ok(())
    }

    fn id(&self) -> String {
        self.header().id.clone()
    }

    fn thread_id(&self) -> String {
        self.header().thread_id()
    }

    fn set_thread(&mut self, thid: Option<String>, pthid: Option<String>) {
        self.header_mut().thread = Some(Thread::new(thid, pthid));
    }

    fn set_return_route(&mut self) {
        self.header_mut().transport = Some(TransportDecorator {
            return_route: Some(RETURN_ROUTE_ALL.to_string()),
        });
    }

    fn to_value(&self) -> Result<Value, MessageError> {
        serde_json::to_value(self).map_err(|err| MessageError::JSONError(err.to_string()))
    }

    fn from_value(value: &Value) -> Result<Self, MessageError> {
        let header = MessageHeader::from_value(value)?;
        let message_type = header.message_type()?;
        if !Self::accepts(&message_type) {
            return Err(MessageError::UnexpectedMessageType(header.type_uri));
        }

        let message: Self = serde_json::from_value(value.clone())
            .map_err(|err| MessageError::MalformedMessage(err.to_string()))?;

        message.validate()?;
        Ok(message)
    }
}

/// `agent_message` implements [`AgentMessage`] for a struct with a flattened `header` field,
/// optionally with a validation closure
macro_rules! agent_message {
    ($name:ident, $type_uri:expr) => {
        impl $crate::didcomm::message::AgentMessage for $name {
            const TYPE: &'static str = $type_uri;

            fn header(&self) -> &$crate::didcomm::message::MessageHeader {
                &self.header
            }

            fn header_mut(&mut self) -> &mut $crate::didcomm::message::MessageHeader {
                &mut self.header
            }
        }
    };
    ($name:ident, $type_uri:expr, $validate:expr) => {
        impl $crate::didcomm::message::AgentMessage for $name {
            const TYPE: &'static str = $type_uri;

            fn header(&self) -> &$crate::didcomm::message::MessageHeader {
                &self.header
            }

            fn header_mut(&mut self) -> &mut $crate::didcomm::message::MessageHeader {
                &mut self.header
            }

            fn validate(&self) -> Result<(), $crate::didcomm::message::types::MessageError> {
                $validate(self)
            }
        }
    };
}

pub(crate) use agent_message;

#[cfg(test)]
mod tests {
    use super::*;
    use rst_common::standard::serde_json::json;

    #[derive(Serialize, Deserialize, Debug, Clone)]
    #[serde(crate = "self::serde")]
    struct FakeMessage {
        #[serde(flatten)]
        header: MessageHeader,
        content: String,
    }

    impl AgentMessage for FakeMessage {
        const TYPE: &'static str = "https://didcomm.org/fake/1.0/message";

        fn header(&self) -> &MessageHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut MessageHeader {
            &mut self.header
        }

        fn validate(&self) -> Result<(), MessageError> {
            if self.content.is_empty() {
                return Err(MessageError::ValidationError(
                    "content was missing".to_string(),
                ));
            }

            Ok(())
        }
    }

    #[test]
    fn test_from_value_success() {
        let value = json!({
            "@id": "123",
            "@type": "https://didcomm.org/fake/1.3/message",
            "~thread": {"thid": "thread-1"},
            "content": "hello"
        });

        let message = FakeMessage::from_value(&value).unwrap();
        assert_eq!(message.content, "hello");
        assert_eq!(message.thread_id(), "thread-1");
        assert_eq!(message.id(), "123")
    }

    #[test]
    fn test_from_value_wrong_type() {
        let value = json!({
            "@id": "123",
            "@type": "https://didcomm.org/other/1.0/message",
            "content": "hello"
        });

        let message = FakeMessage::from_value(&value);
        assert!(matches!(
            message.unwrap_err(),
            MessageError::UnexpectedMessageType(_)
        ))
    }

    #[test]
    fn test_from_value_validation_failed() {
        let value = json!({
            "@id": "123",
            "@type": FakeMessage::TYPE,
            "content": ""
        });

        let message = FakeMessage::from_value(&value);
        assert!(matches!(
            message.unwrap_err(),
            MessageError::ValidationError(_)
        ))
    }

    #[test]
    fn test_return_route_and_thread_fallback() {
        let mut message = FakeMessage {
            header: MessageHeader::new(FakeMessage::TYPE),
            content: "hello".to_string(),
        };

        assert_eq!(message.thread_id(), message.id());
        assert!(!message.header().has_return_route());

        message.set_return_route();
        let value = message.to_value().unwrap();
        assert_eq!(value["~transport"]["return_route"], "all");
        assert!(MessageHeader::from_value(&value).unwrap().has_return_route())
    }
}
