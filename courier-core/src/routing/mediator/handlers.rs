use rst_common::standard::async_trait::async_trait;

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::dispatcher::types::{HandlerError, MessageHandler};
use crate::didcomm::message::{AgentMessage, ForwardMessage};
use crate::routing::mediation::messages::{KeylistUpdate, MediationRequest};
use crate::routing::pickup::messages::{
    BatchPickup, DeliveryRequest, LiveDeliveryChange, MessagesReceived, StatusRequest,
};
use crate::wallet::types::Wallet;

use super::types::MediatorError;
use super::usecase::MediatorUsecase;

impl From<MediatorError> for HandlerError {
    fn from(value: MediatorError) -> Self {
        match value {
            MediatorError::InvalidState(msg) => HandlerError::InvalidState(msg),
            MediatorError::RecordNotFound(msg) | MediatorError::UnknownRecipient(msg) => {
                HandlerError::NotFound(msg)
            }
            MediatorError::MessageError(msg) => HandlerError::ProtocolViolation(msg),
            MediatorError::WalletError(msg) => HandlerError::Crypto(msg),
            _ => HandlerError::Internal(value.to_string()),
        }
    }
}

/// `ForwardHandler` accepts the `routing/1.0/forward` messages sent to the mediator routing key
pub struct ForwardHandler<TWallet>
where
    TWallet: Wallet,
{
    mediator: MediatorUsecase<TWallet>,
}

impl<TWallet> ForwardHandler<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(mediator: MediatorUsecase<TWallet>) -> Self {
        Self { mediator }
    }
}

#[async_trait]
impl<TWallet> MessageHandler for ForwardHandler<TWallet>
where
    TWallet: Wallet + 'static,
{
    fn supported_types(&self) -> Vec<String> {
        vec![ForwardMessage::TYPE.to_string()]
    }

    async fn handle(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, HandlerError> {
        self.mediator.process_forward(ctx).await?;
        Ok(None)
    }
}

/// `MediatorHandler` serves the mediation requests and keylist updates of the recipients
pub struct MediatorHandler<TWallet>
where
    TWallet: Wallet,
{
    mediator: MediatorUsecase<TWallet>,
}

impl<TWallet> MediatorHandler<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(mediator: MediatorUsecase<TWallet>) -> Self {
        Self { mediator }
    }
}

#[async_trait]
impl<TWallet> MessageHandler for MediatorHandler<TWallet>
where
    TWallet: Wallet + 'static,
{
    fn supported_types(&self) -> Vec<String> {
        vec![
            MediationRequest::TYPE.to_string(),
            KeylistUpdate::TYPE.to_string(),
        ]
    }

    async fn handle(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, HandlerError> {
        if MediationRequest::accepts(&ctx.message_type) {
            return Ok(self.mediator.process_mediation_request(ctx).await?);
        }

        Ok(self.mediator.process_keylist_update(ctx).await?)
    }
}

/// `MediatorPickupHandler` serves both pickup protocol versions from the mediator queue
pub struct MediatorPickupHandler<TWallet>
where
    TWallet: Wallet,
{
    mediator: MediatorUsecase<TWallet>,
}

impl<TWallet> MediatorPickupHandler<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(mediator: MediatorUsecase<TWallet>) -> Self {
        Self { mediator }
    }
}

#[async_trait]
impl<TWallet> MessageHandler for MediatorPickupHandler<TWallet>
where
    TWallet: Wallet + 'static,
{
    fn supported_types(&self) -> Vec<String> {
        vec![
            BatchPickup::TYPE.to_string(),
            StatusRequest::TYPE.to_string(),
            DeliveryRequest::TYPE.to_string(),
            MessagesReceived::TYPE.to_string(),
            LiveDeliveryChange::TYPE.to_string(),
        ]
    }

    async fn handle(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, HandlerError> {
        let message_type = &ctx.message_type;

        let outbound = if BatchPickup::accepts(message_type) {
            self.mediator.process_batch_pickup(ctx).await?
        } else if StatusRequest::accepts(message_type) {
            self.mediator.process_status_request(ctx).await?
        } else if DeliveryRequest::accepts(message_type) {
            self.mediator.process_delivery_request(ctx).await?
        } else if MessagesReceived::accepts(message_type) {
            self.mediator.process_messages_received(ctx).await?
        } else {
            self.mediator.process_live_delivery_change(ctx).await?
        };

        Ok(outbound)
    }
}
