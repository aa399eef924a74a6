use rst_common::standard::async_trait::async_trait;
use rst_common::with_errors::thiserror::{self, Error};

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::message::types::MessageError;

/// `HandlerError` is the error contract of every message handler
#[derive(Debug, PartialEq, Clone, Error)]
pub enum HandlerError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MessageError> for HandlerError {
    fn from(value: MessageError) -> Self {
        HandlerError::ProtocolViolation(value.to_string())
    }
}

#[derive(Debug, PartialEq, Error)]
pub enum DispatcherError {
    #[error("duplicate handler: {0}")]
    DuplicateHandler(String),

    #[error("no message handlers registered")]
    NoHandlersRegistered,

    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(String),

    #[error("invalid message type: {0}")]
    InvalidMessageType(String),

    #[error("handler error: {0}")]
    HandlerError(HandlerError),

    #[error("lock error: {0}")]
    LockError(String),
}

/// `MessageHandler` processes the messages of one or more message types
///
/// A handler may return an outbound message, the agent delivers it either as a return routed
/// reply or through the regular sender.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn supported_types(&self) -> Vec<String>;

    async fn handle(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, HandlerError>;
}
