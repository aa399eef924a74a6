//! `agent` is the composition root of a single agent instance.
//!
//! [`Agent`] owns the wallet, the store, the event stream, the dispatcher with every protocol
//! handler registered, the sender and the inbound queue. Every inbound envelope, whatever the
//! transport it came from, goes through [`Agent::receive`]:
//!
//! ```text
//! bytes -> unpack -> connection lookup -> dispatch -> reply (return route) or send
//! ```
//!
//! On [`Agent::start`] the inbound worker is spawned and, when configured, the agent connects to
//! its mediator and starts picking up its messages.
pub mod config;
pub mod types;

mod agent;
pub use agent::Agent;

mod bootstrap;

#[cfg(test)]
mod scenarios;
