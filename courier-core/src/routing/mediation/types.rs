use std::fmt;
use std::time::Duration;

use rst_common::standard::async_trait::async_trait;
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::with_errors::thiserror::{self, Error};

use super::mediation::MediationRecord;

pub const MEDIATION_PROTOCOL: &str = "https://didcomm.org/coordinate-mediation/1.0";

pub const DEFAULT_GRANT_TIMEOUT: Duration = Duration::from_secs(20);
pub const KEYLIST_UPDATE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, PartialEq, Clone, Error)]
pub enum MediationError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("send error: {0}")]
    SendError(String),

    #[error("message error: {0}")]
    MessageError(String),

    #[error("wallet error: {0}")]
    WalletError(String),

    #[error("mediation denied: {0}")]
    Denied(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde", rename_all = "snake_case")]
pub enum MediationRole {
    Mediator,
    Recipient,
}

impl MediationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediationRole::Mediator => "mediator",
            MediationRole::Recipient => "recipient",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde", rename_all = "snake_case")]
pub enum MediationState {
    Requested,
    Granted,
    Denied,
}

impl MediationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediationState::Requested => "requested",
            MediationState::Granted => "granted",
            MediationState::Denied => "denied",
        }
    }

    /// `Granted` and `Denied` are both terminal
    pub fn can_move_to(&self, next: MediationState) -> bool {
        matches!(
            (self, next),
            (MediationState::Requested, MediationState::Granted)
                | (MediationState::Requested, MediationState::Denied)
        )
    }
}

impl fmt::Display for MediationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde", rename_all = "snake_case")]
pub enum KeylistAction {
    Add,
    Remove,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde", rename_all = "snake_case")]
pub enum KeylistResult {
    ClientError,
    ServerError,
    NoChange,
    Success,
}

/// `MediationRecipientAPI` is the recipient side of the mediation coordination
#[async_trait]
pub trait MediationRecipientAPI: Clone + Send + Sync {
    async fn request_mediation(&self, connection_id: &str)
        -> Result<MediationRecord, MediationError>;

    /// `request_and_await_grant` fails with [`MediationError::Denied`] when the mediator
    /// refuses and with [`MediationError::Timeout`] when it never answers
    async fn request_and_await_grant(
        &self,
        connection_id: &str,
        timeout: Option<Duration>,
    ) -> Result<MediationRecord, MediationError>;

    async fn keylist_update(
        &self,
        mediation_id: &str,
        verkey: &str,
        action: KeylistAction,
    ) -> Result<(), MediationError>;

    async fn find_default_mediator(&self) -> Result<Option<MediationRecord>, MediationError>;

    async fn set_default_mediator(
        &self,
        mediation_id: &str,
    ) -> Result<MediationRecord, MediationError>;

    async fn get_mediators(&self) -> Result<Vec<MediationRecord>, MediationError>;

    async fn find_by_connection_id(
        &self,
        connection_id: &str,
    ) -> Result<Option<MediationRecord>, MediationError>;
}
