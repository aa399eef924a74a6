use rst_common::with_errors::thiserror::{self, Error};

/// Protocol family prefix used by all message types of this agent
pub const DIDCOMM_PREFIX: &str = "https://didcomm.org/";

/// Legacy prefix which still appears on messages produced by older agents
pub const LEGACY_DIDCOMM_PREFIX: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/";

pub const RETURN_ROUTE_ALL: &str = "all";

#[derive(Debug, PartialEq, Error)]
pub enum MessageError {
    #[error("invalid message type: {0}")]
    InvalidMessageType(String),

    #[error("unexpected message type: {0}")]
    UnexpectedMessageType(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("connection not ready: {0}")]
    ConnectionNotReady(String),

    #[error("json error: {0}")]
    JSONError(String),
}
