//! `didcomm` holds the messaging plumbing which is independent of any specific protocol:
//!
//! - `envelope`, packing and unpacking plaintext messages into encrypted envelopes, including
//!   the `forward` wrapping used to route through mediators
//! - `message`, versioned message type URIs, decorators and the typed message contract
//! - `context`, the per-message inbound and outbound contexts
//! - `dispatcher`, the message type to handler registry
//! - `sender`, the outbound delivery with endpoint resolution and retries
//! - `transport`, the transport abstractions, sessions, backoff and an in-memory transport
//! - `events`, the agent event stream
pub mod context;
pub mod dispatcher;
pub mod envelope;
pub mod events;
pub mod message;
pub mod sender;
pub mod transport;
