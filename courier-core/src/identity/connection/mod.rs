//! `connection` is the handshake engine.
//!
//! Two interoperable protocol variants share one state machine:
//!
//! ```text
//! requester: Start --request--> Requested --response--> Responded --complete/ping--> Complete
//! responder: Invited --request--> Requested --response--> Responded --complete/any--> Complete
//! ```
//!
//! `DidExchange` (`didexchange/1.1`) signs the responder document as a `did_doc~attach` JWS and
//! ends with an explicit `complete` message. The legacy `Connections` (`connections/1.0`)
//! protocol signs the response with a `connection~sig` decorator and ends with a trust ping.
//! Any state can move to `Abandoned` through a problem report.
pub mod types;

mod connection;
pub use connection::ConnectionRecord;

pub mod messages;

mod signature;
pub use signature::{sign_attachment, verify_attachment, SignatureDecorator};

mod usecase;
pub use usecase::ConnectionUsecase;

mod handlers;
pub use handlers::{ConnectionsHandler, DidExchangeHandler, TrustPingHandler};
