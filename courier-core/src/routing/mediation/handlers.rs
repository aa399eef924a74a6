use rst_common::standard::async_trait::async_trait;

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::dispatcher::types::{HandlerError, MessageHandler};
use crate::didcomm::message::AgentMessage;
use crate::wallet::types::Wallet;

use super::messages::{KeylistUpdateResponse, MediationDeny, MediationGrant};
use super::types::MediationError;
use super::usecase::MediationRecipientUsecase;

impl From<MediationError> for HandlerError {
    fn from(value: MediationError) -> Self {
        match value {
            MediationError::InvalidState(msg) => HandlerError::InvalidState(msg),
            MediationError::RecordNotFound(msg) => HandlerError::NotFound(msg),
            MediationError::MessageError(msg) => HandlerError::ProtocolViolation(msg),
            MediationError::WalletError(msg) => HandlerError::Crypto(msg),
            _ => HandlerError::Internal(value.to_string()),
        }
    }
}

/// `MediationRecipientHandler` handles the mediator answers: grant, deny and keylist update
/// responses
pub struct MediationRecipientHandler<TWallet>
where
    TWallet: Wallet,
{
    mediation: MediationRecipientUsecase<TWallet>,
}

impl<TWallet> MediationRecipientHandler<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(mediation: MediationRecipientUsecase<TWallet>) -> Self {
        Self { mediation }
    }
}

#[async_trait]
impl<TWallet> MessageHandler for MediationRecipientHandler<TWallet>
where
    TWallet: Wallet + 'static,
{
    fn supported_types(&self) -> Vec<String> {
        vec![
            MediationGrant::TYPE.to_string(),
            MediationDeny::TYPE.to_string(),
            KeylistUpdateResponse::TYPE.to_string(),
        ]
    }

    async fn handle(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, HandlerError> {
        if MediationGrant::accepts(&ctx.message_type) {
            self.mediation.process_grant(ctx).await?;
        } else if MediationDeny::accepts(&ctx.message_type) {
            self.mediation.process_deny(ctx).await?;
        } else {
            self.mediation.process_keylist_update_response(ctx).await?;
        }

        Ok(None)
    }
}
