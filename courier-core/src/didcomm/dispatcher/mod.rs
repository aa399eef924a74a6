//! `dispatcher` routes each inbound message to the single handler registered for its type.
//!
//! Handlers are registered by message type URI. The minor version is ignored when resolving a
//! handler, a handler registered for `didexchange/1.1/request` also handles `1.0` requests.
pub mod types;

mod dispatcher;
pub use dispatcher::Dispatcher;
