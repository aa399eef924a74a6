//! `sender` delivers outbound messages.
//!
//! The destination is resolved in this order: an open session for the connection, every
//! reachable service of the peer (or the explicit service override), and finally the mediator
//! queue when this agent mediates for the peer. Transient transport failures are retried with
//! the reconnect backoff policy bounded by an attempt budget.
pub mod types;

mod sender;
pub use sender::MessageSender;
