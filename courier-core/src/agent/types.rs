use rst_common::with_errors::thiserror::{self, Error};

/// `AgentError` is the error returned by the agent composition root, each variant carries the
/// message of the sub-domain error it wraps
#[derive(Debug, PartialEq, Clone, Error)]
pub enum AgentError {
    #[error("envelope error: {0}")]
    EnvelopeError(String),

    #[error("message error: {0}")]
    MessageError(String),

    #[error("dispatch error: {0}")]
    DispatchError(String),

    #[error("send error: {0}")]
    SendError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("out of band error: {0}")]
    OutOfBandError(String),

    #[error("mediation error: {0}")]
    MediationError(String),

    #[error("pickup error: {0}")]
    PickupError(String),

    #[error("config error: {0}")]
    ConfigError(String),
}
