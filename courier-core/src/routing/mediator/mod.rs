//! `mediator` is the mediator role: it grants mediation, keeps the keylist of each recipient,
//! queues the forward messages addressed to them and serves the pickup protocols.
//!
//! All recipients share a single routing key. Queued messages are only removed once the
//! recipient acknowledged them (`messages-received`) or fetched them with a v1 batch.
pub mod types;

mod queue;
pub use queue::InMemoryQueue;

mod usecase;
pub use usecase::MediatorUsecase;

mod handlers;
pub use handlers::{ForwardHandler, MediatorHandler, MediatorPickupHandler};
