//! `oob` is the out-of-band coordinator, the entry point of every connection.
//!
//! A sender creates an invitation carrying a fresh invitation key and its routing, the receiver
//! stores it and accepts it, which starts the handshake through the connection engine.
//!
//! ```text
//! sender:   AwaitResponse --first request (single use)--> Done
//! receiver: PrepareResponse --accept--> Connected --handshake complete--> Done
//! ```
pub mod types;

mod out_of_band;
pub use out_of_band::OutOfBandRecord;

pub mod messages;

mod usecase;
pub use usecase::OutOfBandUsecase;
