use rst_common::standard::async_trait::async_trait;
use rst_common::standard::chrono::serde::ts_seconds;
use rst_common::standard::chrono::{DateTime, Utc};
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::with_errors::thiserror::{self, Error};

use crate::didcomm::envelope::types::Envelope;
use crate::storage::types::{Record, Tags};

pub const MEDIATOR_ROUTING_RECORD_ID: &str = "mediator-routing";

#[derive(Debug, PartialEq, Clone, Error)]
pub enum MediatorError {
    #[error("queue error: {0}")]
    QueueError(String),

    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("message error: {0}")]
    MessageError(String),

    #[error("wallet error: {0}")]
    WalletError(String),

    #[error("send error: {0}")]
    SendError(String),
}

/// `QueuedMessage` is an envelope waiting for its recipient to pick it up
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct QueuedMessage {
    pub id: String,
    pub connection_id: String,
    pub recipient_key: String,
    pub encrypted_message: Envelope,

    #[serde(with = "ts_seconds")]
    pub received_at: DateTime<Utc>,
}

/// `MessageQueue` keeps the messages per recipient connection in arrival order
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn add(&self, message: QueuedMessage) -> Result<(), MediatorError>;

    async fn count(&self, connection_id: &str) -> Result<usize, MediatorError>;

    /// `peek` returns the oldest messages without removing them
    async fn peek(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<QueuedMessage>, MediatorError>;

    /// `take` returns and removes the oldest messages
    async fn take(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<QueuedMessage>, MediatorError>;

    /// `remove` drops the given message ids and returns how many were found
    async fn remove(&self, connection_id: &str, ids: &[String]) -> Result<usize, MediatorError>;
}

/// `MediatorRoutingRecord` holds the routing key shared by every recipient
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct MediatorRoutingRecord {
    pub id: String,
    pub routing_keys: Vec<String>,

    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub version: u64,
}

impl MediatorRoutingRecord {
    pub fn new(routing_key: String) -> Self {
        Self {
            id: MEDIATOR_ROUTING_RECORD_ID.to_string(),
            routing_keys: vec![routing_key],
            created_at: Utc::now(),
            version: 0,
        }
    }
}

impl Record for MediatorRoutingRecord {
    const RECORD_TYPE: &'static str = "mediator_routing";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn tags(&self) -> Tags {
        Tags::new()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version
    }
}

#[derive(Debug, Clone)]
pub struct MediatorConfig {
    pub auto_accept_mediation_requests: bool,

    /// `endpoint` is published in every grant, it must be reachable by the senders
    pub endpoint: String,
}
