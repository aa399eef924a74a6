use std::fmt;

use rst_common::standard::async_trait::async_trait;
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::with_errors::thiserror::{self, Error};

use crate::identity::connection::types::{AcceptConfig, HandshakeProtocol};
use crate::identity::connection::ConnectionRecord;

use super::messages::OutOfBandInvitation;
use super::out_of_band::OutOfBandRecord;

pub const OUT_OF_BAND_PROTOCOL: &str = "https://didcomm.org/out-of-band/1.1";

pub const URL_PARAM_OOB: &str = "oob";
pub const URL_PARAM_LEGACY: &str = "c_i";

#[derive(Debug, PartialEq, Clone, Error)]
pub enum OutOfBandError {
    #[error("duplicate invitation: {0}")]
    DuplicateInvitation(String),

    #[error("invitation already used: {0}")]
    InvitationAlreadyUsed(String),

    #[error("invalid invitation: {0}")]
    InvalidInvitation(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("routing error: {0}")]
    RoutingError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("url error: {0}")]
    UrlError(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde", rename_all = "snake_case")]
pub enum OobRole {
    Sender,
    Receiver,
}

impl OobRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OobRole::Sender => "sender",
            OobRole::Receiver => "receiver",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde", rename_all = "kebab-case")]
pub enum OobState {
    Initial,
    AwaitResponse,
    PrepareResponse,
    Connected,
    Done,
}

impl OobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OobState::Initial => "initial",
            OobState::AwaitResponse => "await-response",
            OobState::PrepareResponse => "prepare-response",
            OobState::Connected => "connected",
            OobState::Done => "done",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            OobState::Initial => 0,
            OobState::AwaitResponse | OobState::PrepareResponse => 1,
            OobState::Connected => 2,
            OobState::Done => 3,
        }
    }

    pub fn can_move_to(&self, next: OobState) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for OobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `CreateInvitationConfig` are the options of a new invitation, empty values fall back to the
/// agent configuration
#[derive(Debug, Clone)]
pub struct CreateInvitationConfig {
    pub label: Option<String>,
    pub goal_code: Option<String>,
    pub goal: Option<String>,
    pub image_url: Option<String>,
    pub handshake_protocols: Vec<HandshakeProtocol>,
    pub multi_use: bool,
    pub auto_accept_connection: Option<bool>,
    pub mediator_id: Option<String>,
}

impl Default for CreateInvitationConfig {
    fn default() -> Self {
        Self {
            label: None,
            goal_code: None,
            goal: None,
            image_url: None,
            handshake_protocols: vec![
                HandshakeProtocol::DidExchange,
                HandshakeProtocol::Connections,
            ],
            multi_use: false,
            auto_accept_connection: None,
            mediator_id: None,
        }
    }
}

/// `OutOfBandAPI` is the public surface of the out-of-band coordinator
#[async_trait]
pub trait OutOfBandAPI: Clone + Send + Sync {
    async fn create_invitation(
        &self,
        config: CreateInvitationConfig,
    ) -> Result<(OutOfBandRecord, OutOfBandInvitation), OutOfBandError>;

    /// `receive_invitation` stores an invitation as a receiver record, it does not connect yet
    async fn receive_invitation(
        &self,
        invitation: OutOfBandInvitation,
    ) -> Result<OutOfBandRecord, OutOfBandError>;

    async fn receive_invitation_from_url(
        &self,
        url: &str,
    ) -> Result<OutOfBandRecord, OutOfBandError>;

    /// `accept_invitation` starts the handshake, the returned connection is in `Requested`
    async fn accept_invitation(
        &self,
        out_of_band_id: &str,
        config: AcceptConfig,
    ) -> Result<ConnectionRecord, OutOfBandError>;

    async fn find_by_invitation_id(
        &self,
        invitation_id: &str,
    ) -> Result<Option<OutOfBandRecord>, OutOfBandError>;

    async fn get_by_id(&self, out_of_band_id: &str) -> Result<OutOfBandRecord, OutOfBandError>;

    async fn find_all(&self) -> Result<Vec<OutOfBandRecord>, OutOfBandError>;

    async fn delete_by_id(&self, out_of_band_id: &str) -> Result<(), OutOfBandError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use table_test::table_test;

    #[test]
    fn test_oob_transitions() {
        let table = vec![
            ((OobState::Initial, OobState::AwaitResponse), true),
            ((OobState::AwaitResponse, OobState::Done), true),
            ((OobState::PrepareResponse, OobState::Connected), true),
            ((OobState::Connected, OobState::Done), true),
            ((OobState::Connected, OobState::Connected), false),
            ((OobState::Done, OobState::Connected), false),
        ];

        for (validator, input, expected) in table_test!(table) {
            validator
                .given(&format!("{:?}", input))
                .when("check transition")
                .then("only forward moves are allowed")
                .assert_eq(expected, input.0.can_move_to(input.1));
        }
    }
}
