use rst_common::standard::chrono::{DateTime, Utc};
use rst_common::standard::serde_json::Value;

use crate::identity::connection::ConnectionRecord;
use crate::identity::did::types::ResolvedService;

use super::message::types::MessageError;
use super::message::{AgentMessage, MessageHeader, MessageType};
use super::transport::SessionHandle;

/// `InboundMessageContext` is everything known about a single decrypted inbound message
#[derive(Debug, Clone)]
pub struct InboundMessageContext {
    pub message: Value,
    pub header: MessageHeader,
    pub message_type: MessageType,
    pub sender_key: Option<String>,
    pub recipient_key: Option<String>,
    pub connection: Option<ConnectionRecord>,
    pub session: Option<SessionHandle>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessageContext {
    pub fn new(
        message: Value,
        sender_key: Option<String>,
        recipient_key: Option<String>,
    ) -> Result<Self, MessageError> {
        let header = MessageHeader::from_value(&message)?;
        let message_type = header.message_type()?;

        Ok(Self {
            message,
            header,
            message_type,
            sender_key,
            recipient_key,
            connection: None,
            session: None,
            received_at: Utc::now(),
        })
    }

    pub fn with_connection(mut self, connection: Option<ConnectionRecord>) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_session(mut self, session: Option<SessionHandle>) -> Self {
        self.session = session;
        self
    }

    /// `message_as` maps the raw message into its typed form
    pub fn message_as<T: AgentMessage>(&self) -> Result<T, MessageError> {
        T::from_value(&self.message)
    }

    /// `assert_ready_connection` returns the connection only once the handshake reached a state
    /// where application messages are accepted
    pub fn assert_ready_connection(&self) -> Result<&ConnectionRecord, MessageError> {
        match &self.connection {
            Some(connection) if connection.is_ready() => Ok(connection),
            Some(connection) => Err(MessageError::ConnectionNotReady(format!(
                "connection {} in state {}",
                connection.id, connection.state
            ))),
            None => Err(MessageError::ConnectionNotReady(format!(
                "no connection for message {}",
                self.header.id
            ))),
        }
    }
}

/// `OutboundMessageContext` is a plaintext message waiting to be packed and delivered
#[derive(Debug, Clone)]
pub struct OutboundMessageContext {
    pub message: Value,
    pub connection: Option<ConnectionRecord>,
    pub service_override: Option<ResolvedService>,
    pub sender_key: Option<String>,
    pub associated_record_id: Option<String>,
    pub session: Option<SessionHandle>,
}

impl OutboundMessageContext {
    pub fn new<T: AgentMessage>(
        message: &T,
        connection: Option<ConnectionRecord>,
    ) -> Result<Self, MessageError> {
        Ok(Self {
            message: message.to_value()?,
            connection,
            service_override: None,
            sender_key: None,
            associated_record_id: None,
            session: None,
        })
    }

    /// `with_service` sends the message to an explicit service instead of the connection's
    /// peer document, used before the peer document is known
    pub fn with_service(mut self, service: ResolvedService, sender_key: Option<String>) -> Self {
        self.service_override = Some(service);
        self.sender_key = sender_key;
        self
    }

    pub fn with_associated_record(mut self, record_id: &str) -> Self {
        self.associated_record_id = Some(record_id.to_string());
        self
    }

    pub fn with_session(mut self, session: Option<SessionHandle>) -> Self {
        self.session = session;
        self
    }

    pub fn message_type(&self) -> Result<MessageType, MessageError> {
        MessageHeader::from_value(&self.message)?.message_type()
    }
}
