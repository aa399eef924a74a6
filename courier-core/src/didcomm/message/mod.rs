//! Typed `DIDComm` messages.
//!
//! Every protocol message is a plain serde struct which embeds a [`MessageHeader`] through
//! `#[serde(flatten)]` and implements [`AgentMessage`]. Inbound JSON is mapped explicitly into
//! these structs and validated, there is no runtime reflection involved.
pub mod types;

mod decorators;
pub use decorators::{Attachment, AttachmentData, Thread, TransportDecorator};

mod message_type;
pub use message_type::MessageType;

mod header;
pub(crate) use header::agent_message;
pub use header::{AgentMessage, MessageHeader};

mod forward;
pub use forward::ForwardMessage;
