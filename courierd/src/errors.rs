use rst_common::with_errors::thiserror::{self, Error};

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("agent error: {0}")]
    AgentError(String),

    #[error("server error: {0}")]
    ServerError(String),
}
