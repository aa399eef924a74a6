use std::fmt;
use std::time::Duration;

use rst_common::standard::async_trait::async_trait;
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::with_errors::thiserror::{self, Error};

use crate::didcomm::context::OutboundMessageContext;
use crate::identity::oob::OutOfBandRecord;
use crate::storage::types::Query;

use super::connection::ConnectionRecord;

pub const DIDEXCHANGE_PROTOCOL: &str = "https://didcomm.org/didexchange/1.1";
pub const CONNECTIONS_PROTOCOL: &str = "https://didcomm.org/connections/1.0";

pub const DEFAULT_CONNECTED_TIMEOUT: Duration = Duration::from_millis(20_000);

/// `ConnectionError` is a base error types for the handshake engine
#[derive(Debug, PartialEq, Clone, Error)]
pub enum ConnectionError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invitation already used: {0}")]
    InvitationAlreadyUsed(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("crypto error: {0}")]
    CryptoError(String),

    #[error("message error: {0}")]
    MessageError(String),

    #[error("send error: {0}")]
    SendError(String),

    #[error("routing error: {0}")]
    RoutingError(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

/// `ConnectionState` holds both protocol variants, the order of the variants is the order in
/// which a handshake moves forward
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde", rename_all = "snake_case")]
pub enum ConnectionState {
    Start,
    Invited,
    Requested,
    Responded,
    Complete,
    Abandoned,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Start => "start",
            ConnectionState::Invited => "invited",
            ConnectionState::Requested => "requested",
            ConnectionState::Responded => "responded",
            ConnectionState::Complete => "complete",
            ConnectionState::Abandoned => "abandoned",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ConnectionState::Start | ConnectionState::Invited => 0,
            ConnectionState::Requested => 1,
            ConnectionState::Responded => 2,
            ConnectionState::Complete => 3,
            ConnectionState::Abandoned => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Complete | ConnectionState::Abandoned)
    }

    /// `can_move_to` only allows forward moves, `Abandoned` is reachable from any non
    /// terminal state
    pub fn can_move_to(&self, next: ConnectionState) -> bool {
        match next {
            ConnectionState::Abandoned => !self.is_terminal(),
            _ => !self.is_terminal() && next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde", rename_all = "snake_case")]
pub enum ConnectionRole {
    Requester,
    Responder,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::Requester => "requester",
            ConnectionRole::Responder => "responder",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde")]
pub enum HandshakeProtocol {
    DidExchange,
    Connections,
}

impl HandshakeProtocol {
    pub fn uri(&self) -> &'static str {
        match self {
            HandshakeProtocol::DidExchange => DIDEXCHANGE_PROTOCOL,
            HandshakeProtocol::Connections => CONNECTIONS_PROTOCOL,
        }
    }

    /// `from_uri` matches on the protocol name and major version only
    pub fn from_uri(uri: &str) -> Option<Self> {
        let trimmed = uri.trim_end_matches('/');
        let (protocol, version) = trimmed.rsplit_once('/')?;
        let major = version.split('.').next()?;

        match (protocol.rsplit('/').next()?, major) {
            ("didexchange", "1") => Some(HandshakeProtocol::DidExchange),
            ("connections", "1") => Some(HandshakeProtocol::Connections),
            _ => None,
        }
    }
}

/// `HandshakeConfig` carries the agent settings used by the handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub label: String,
    pub image_url: Option<String>,
    pub auto_accept_connections: bool,
}

/// `AcceptConfig` are the per call options of a requester accepting an invitation
#[derive(Debug, Clone, Default)]
pub struct AcceptConfig {
    pub label: Option<String>,
    pub auto_accept_connection: Option<bool>,
    pub protocol: Option<HandshakeProtocol>,
}

/// `ConnectionAPI` is the public surface of the handshake engine
#[async_trait]
pub trait ConnectionAPI: Clone + Send + Sync {
    /// `start_handshake` creates a requester record from an out-of-band invitation, returns
    /// the record in `Requested` and the request message to deliver
    async fn start_handshake(
        &self,
        out_of_band: &OutOfBandRecord,
        config: AcceptConfig,
    ) -> Result<(ConnectionRecord, OutboundMessageContext), ConnectionError>;

    async fn accept_request(
        &self,
        connection_id: &str,
    ) -> Result<ConnectionRecord, ConnectionError>;

    async fn accept_response(
        &self,
        connection_id: &str,
    ) -> Result<ConnectionRecord, ConnectionError>;

    async fn abandon(
        &self,
        connection_id: &str,
        reason: &str,
    ) -> Result<ConnectionRecord, ConnectionError>;

    async fn send_ping(
        &self,
        connection_id: &str,
        response_requested: bool,
    ) -> Result<ConnectionRecord, ConnectionError>;

    async fn get_by_id(&self, connection_id: &str) -> Result<ConnectionRecord, ConnectionError>;

    async fn find_by_query(&self, query: &Query) -> Result<Vec<ConnectionRecord>, ConnectionError>;

    async fn find_all(&self) -> Result<Vec<ConnectionRecord>, ConnectionError>;

    async fn delete_by_id(&self, connection_id: &str) -> Result<(), ConnectionError>;

    async fn set_tag(
        &self,
        connection_id: &str,
        name: &str,
        value: &str,
    ) -> Result<ConnectionRecord, ConnectionError>;

    /// `return_when_is_connected` resolves once the connection reaches `Complete` or fails with
    /// [`ConnectionError::Timeout`]
    async fn return_when_is_connected(
        &self,
        connection_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ConnectionRecord, ConnectionError>;
}
