//! `pickup` fetches the messages a mediator keeps for this agent.
//!
//! Three strategies are supported: `messagepickup/1.0` batches, `messagepickup/2.0` polling
//! and the `messagepickup/2.0` live mode. In live mode a persistent session is kept open to the
//! mediator, a dropped session is reopened after `min(base * 2^attempt, cap)`.
pub mod messages;
pub mod types;

mod usecase;
pub use usecase::PickupUsecase;

mod handlers;
pub use handlers::PickupRecipientHandler;
