use std::time::Duration;

use rst_common::with_errors::thiserror::{self, Error};

pub const DEFAULT_SEND_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 100;

#[derive(Debug, PartialEq, Clone, Error)]
pub enum SenderError {
    #[error("no reachable endpoint: {0}")]
    NoReachableEndpoint(String),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("message error: {0}")]
    MessageError(String),

    #[error("queue error: {0}")]
    QueueError(String),
}

/// `RetryPolicy` bounds how many times a transient delivery failure is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub cap: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_SEND_ATTEMPTS,
            base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            cap: None,
        }
    }
}
