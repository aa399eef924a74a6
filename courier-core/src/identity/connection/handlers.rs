use rst_common::standard::async_trait::async_trait;

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::dispatcher::types::{HandlerError, MessageHandler};
use crate::didcomm::message::AgentMessage;
use crate::wallet::types::Wallet;

use super::messages::{
    ConnectionProblemReport, ConnectionRequest, ConnectionResponse, DidExchangeComplete,
    DidExchangeProblemReport, DidExchangeRequest, DidExchangeResponse, TrustPing,
    TrustPingResponse,
};
use super::types::ConnectionError;
use super::usecase::ConnectionUsecase;

impl From<ConnectionError> for HandlerError {
    fn from(value: ConnectionError) -> Self {
        match value {
            ConnectionError::InvalidState(msg) => HandlerError::InvalidState(msg),
            ConnectionError::ProtocolViolation(msg) | ConnectionError::MessageError(msg) => {
                HandlerError::ProtocolViolation(msg)
            }
            ConnectionError::InvitationAlreadyUsed(_) => {
                HandlerError::ProtocolViolation(value.to_string())
            }
            ConnectionError::RecordNotFound(msg) => HandlerError::NotFound(msg),
            ConnectionError::CryptoError(msg) => HandlerError::Crypto(msg),
            _ => HandlerError::Internal(value.to_string()),
        }
    }
}

/// `DidExchangeHandler` drives the `didexchange/1.x` protocol
pub struct DidExchangeHandler<TWallet>
where
    TWallet: Wallet,
{
    connections: ConnectionUsecase<TWallet>,
}

impl<TWallet> DidExchangeHandler<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(connections: ConnectionUsecase<TWallet>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl<TWallet> MessageHandler for DidExchangeHandler<TWallet>
where
    TWallet: Wallet + 'static,
{
    fn supported_types(&self) -> Vec<String> {
        vec![
            DidExchangeRequest::TYPE.to_string(),
            DidExchangeResponse::TYPE.to_string(),
            DidExchangeComplete::TYPE.to_string(),
            DidExchangeProblemReport::TYPE.to_string(),
        ]
    }

    async fn handle(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, HandlerError> {
        let message_type = &ctx.message_type;

        if DidExchangeRequest::accepts(message_type) {
            let (_, outbound) = self.connections.process_request(ctx).await?;
            return Ok(outbound);
        }

        if DidExchangeResponse::accepts(message_type) {
            let (_, outbound) = self.connections.process_response(ctx).await?;
            return Ok(outbound);
        }

        if DidExchangeComplete::accepts(message_type) {
            self.connections.process_complete(ctx).await?;
            return Ok(None);
        }

        self.connections.process_problem_report(ctx).await?;
        Ok(None)
    }
}

/// `ConnectionsHandler` drives the legacy `connections/1.0` protocol, its completion is the
/// trust ping handled by [`TrustPingHandler`]
pub struct ConnectionsHandler<TWallet>
where
    TWallet: Wallet,
{
    connections: ConnectionUsecase<TWallet>,
}

impl<TWallet> ConnectionsHandler<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(connections: ConnectionUsecase<TWallet>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl<TWallet> MessageHandler for ConnectionsHandler<TWallet>
where
    TWallet: Wallet + 'static,
{
    fn supported_types(&self) -> Vec<String> {
        vec![
            ConnectionRequest::TYPE.to_string(),
            ConnectionResponse::TYPE.to_string(),
            ConnectionProblemReport::TYPE.to_string(),
        ]
    }

    async fn handle(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, HandlerError> {
        let message_type = &ctx.message_type;

        if ConnectionRequest::accepts(message_type) {
            let (_, outbound) = self.connections.process_request(ctx).await?;
            return Ok(outbound);
        }

        if ConnectionResponse::accepts(message_type) {
            let (_, outbound) = self.connections.process_response(ctx).await?;
            return Ok(outbound);
        }

        self.connections.process_problem_report(ctx).await?;
        Ok(None)
    }
}

pub struct TrustPingHandler<TWallet>
where
    TWallet: Wallet,
{
    connections: ConnectionUsecase<TWallet>,
}

impl<TWallet> TrustPingHandler<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(connections: ConnectionUsecase<TWallet>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl<TWallet> MessageHandler for TrustPingHandler<TWallet>
where
    TWallet: Wallet + 'static,
{
    fn supported_types(&self) -> Vec<String> {
        vec![
            TrustPing::TYPE.to_string(),
            TrustPingResponse::TYPE.to_string(),
        ]
    }

    async fn handle(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, HandlerError> {
        if TrustPing::accepts(&ctx.message_type) {
            return Ok(self.connections.process_ping(ctx).await?);
        }

        self.connections.process_ping_response(ctx).await?;
        Ok(None)
    }
}
