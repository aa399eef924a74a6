use rst_common::standard::serde::{self, Deserialize, Serialize};

use crate::didcomm::envelope::types::Envelope;

use super::header::{AgentMessage, MessageHeader};
use super::types::MessageError;

/// `ForwardMessage` is the routing protocol message that carries a nested envelope for the
/// next hop identified by `to`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct ForwardMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub to: String,
    pub msg: Envelope,
}

impl ForwardMessage {
    pub fn new(to: String, msg: Envelope) -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
            to,
            msg,
        }
    }
}

impl AgentMessage for ForwardMessage {
    const TYPE: &'static str = "https://didcomm.org/routing/1.0/forward";

    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn validate(&self) -> Result<(), MessageError> {
        if self.to.is_empty() {
            return Err(MessageError::ValidationError(
                "forward: to was missing".to_string(),
            ));
        }

        Ok(())
    }
}
