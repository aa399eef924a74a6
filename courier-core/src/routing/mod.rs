//! `routing` covers everything needed by an agent without a stable address:
//!
//! - `mediation`, the recipient side of `coordinate-mediation/1.0`
//! - `pickup`, fetching queued messages with `messagepickup` v1 and v2, including live mode
//! - `mediator`, the mediator role itself, which queues forwarded messages for its recipients
//!
//! [`RoutingService`] decides the endpoint and routing keys published for every new key.
pub mod mediation;
pub mod mediator;
pub mod pickup;

mod provider;
pub use provider::{Routing, RoutingService};
