//! `transport` moves packed envelopes over `HTTP`.
//!
//! [`HttpTransport`] is the outbound side registered in the core transport registry and
//! [`inbound_router`] exposes any [`prople_courier_core::didcomm::transport::types::InboundHandler`]
//! as an axum router. Both sides use the `application/didcomm-envelope-enc` media type.
mod http;
pub use http::{HttpTransport, DIDCOMM_CONTENT_TYPE};

mod inbound;
pub use inbound::inbound_router;
