//! `transport` abstracts how envelope bytes move between agents.
//!
//! Outbound transports are picked by the endpoint scheme. Duplex sessions are used for return
//! routing and the live pickup mode, inbound frames are always handed to an [`InboundHandler`].
//! The [`MemoryHub`] connects agents living in the same process and is used by the tests.
pub mod types;

mod backoff;
pub use backoff::ReconnectBackoff;

mod session;
pub use session::{InboundFrame, SessionHandle, SessionRegistry, TransportSession};

mod registry;
pub use registry::TransportRegistry;

mod memory;
pub use memory::{MemoryHub, MemoryTransport, MEMORY_SCHEME};
