use derive_more::{AsRef, From, Into};
use the_newtype::Newtype;

use rst_common::standard::async_trait::async_trait;
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::uuid::Uuid;
use rst_common::with_errors::thiserror::{self, Error};

use super::session::{SessionHandle, TransportSession};

/// Endpoint used by agents without any inbound transport, messages for them can only be
/// delivered through an open session or a mediator queue
pub const QUEUE_ENDPOINT: &str = "didcomm:transport/queue";

#[derive(Debug, PartialEq, Clone, Error)]
pub enum TransportError {
    /// A failure that may succeed on a later attempt, like a refused connection
    #[error("transient error: {0}")]
    Transient(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("session closed: {0}")]
    SessionClosed(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Newtype, From, Into, AsRef)]
#[serde(crate = "self::serde")]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `scheme_of` extracts the scheme of an endpoint, `http://host` gives `http`
pub fn scheme_of(endpoint: &str) -> Option<&str> {
    endpoint
        .split_once(':')
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
}

/// `OutboundTransport` delivers a single packed envelope to an endpoint
///
/// A transport may return response bytes, this is how a return routed reply travels back
/// over the same request.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    fn supported_schemes(&self) -> Vec<String>;

    async fn send(&self, endpoint: &str, payload: Vec<u8>)
        -> Result<Option<Vec<u8>>, TransportError>;
}

/// `SessionTransport` opens a long lived duplex channel to an endpoint
#[async_trait]
pub trait SessionTransport: Send + Sync {
    fn supported_schemes(&self) -> Vec<String>;

    async fn open_session(&self, endpoint: &str) -> Result<TransportSession, TransportError>;
}

/// `InboundHandler` is implemented by the agent and receives every inbound frame
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(
        &self,
        payload: Vec<u8>,
        session: Option<SessionHandle>,
    ) -> Result<Option<Vec<u8>>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use table_test::table_test;

    #[test]
    fn test_scheme_of() {
        let table = vec![
            ("http://localhost:8080", Some("http")),
            ("memory://mediator", Some("memory")),
            (QUEUE_ENDPOINT, Some("didcomm")),
            ("localhost", None),
            (":8080", None),
        ];

        for (validator, input, expected) in table_test!(table) {
            validator
                .given(input)
                .when("extract scheme")
                .then("it should return the scheme")
                .assert_eq(expected, scheme_of(input));
        }
    }
}
