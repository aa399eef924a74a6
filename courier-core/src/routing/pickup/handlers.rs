use rst_common::standard::async_trait::async_trait;

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::dispatcher::types::{HandlerError, MessageHandler};
use crate::didcomm::message::AgentMessage;
use crate::wallet::types::Wallet;

use super::messages::{Batch, Delivery, Status};
use super::types::PickupError;
use super::usecase::PickupUsecase;

impl From<PickupError> for HandlerError {
    fn from(value: PickupError) -> Self {
        match value {
            PickupError::MessageError(msg) => HandlerError::ProtocolViolation(msg),
            PickupError::InvalidStrategy(msg) => HandlerError::InvalidState(msg),
            _ => HandlerError::Internal(value.to_string()),
        }
    }
}

/// `PickupRecipientHandler` consumes what the mediator answers to the pickup requests
pub struct PickupRecipientHandler<TWallet>
where
    TWallet: Wallet,
{
    pickup: PickupUsecase<TWallet>,
}

impl<TWallet> PickupRecipientHandler<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(pickup: PickupUsecase<TWallet>) -> Self {
        Self { pickup }
    }
}

#[async_trait]
impl<TWallet> MessageHandler for PickupRecipientHandler<TWallet>
where
    TWallet: Wallet + 'static,
{
    fn supported_types(&self) -> Vec<String> {
        vec![
            Batch::TYPE.to_string(),
            Status::TYPE.to_string(),
            Delivery::TYPE.to_string(),
        ]
    }

    async fn handle(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, HandlerError> {
        if Batch::accepts(&ctx.message_type) {
            self.pickup.process_batch(ctx).await?;
            return Ok(None);
        }

        if Status::accepts(&ctx.message_type) {
            return Ok(self.pickup.process_status(ctx).await?);
        }

        Ok(self.pickup.process_delivery(ctx).await?)
    }
}
