//! `mediation` is the recipient side of `coordinate-mediation/1.0`: requesting a mediator,
//! registering keys with it and choosing the default one.
pub mod types;

mod mediation;
pub use mediation::MediationRecord;

pub mod messages;

mod usecase;
pub use usecase::MediationRecipientUsecase;

mod handlers;
pub use handlers::MediationRecipientHandler;
