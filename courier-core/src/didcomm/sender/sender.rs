use std::sync::Arc;

use rst_common::standard::chrono::Utc;
use rst_common::standard::serde_json::{self, Value};
use rst_common::standard::uuid::Uuid;
use rst_common::with_logging::log::{debug, warn};
use rst_common::with_tokio::tokio::{self, sync::mpsc};

use crate::didcomm::context::OutboundMessageContext;
use crate::didcomm::envelope::types::Envelope;
use crate::didcomm::envelope::{EnvelopePacker, ForwardWrapper};
use crate::didcomm::message::types::RETURN_ROUTE_ALL;
use crate::didcomm::message::{MessageHeader, TransportDecorator};
use crate::didcomm::transport::types::QUEUE_ENDPOINT;
use crate::didcomm::transport::{
    InboundFrame, ReconnectBackoff, SessionRegistry, TransportRegistry,
};
use crate::identity::connection::ConnectionRecord;
use crate::identity::did::types::ResolvedService;
use crate::routing::mediation::types::{MediationRole, MediationState};
use crate::routing::mediation::MediationRecord;
use crate::routing::mediator::types::{MessageQueue, QueuedMessage};
use crate::storage::types::Query;
use crate::storage::Store;
use crate::wallet::types::Wallet;

use super::types::{RetryPolicy, SenderError};

#[derive(Clone)]
pub struct MessageSender<TWallet>
where
    TWallet: Wallet,
{
    packer: EnvelopePacker<TWallet>,
    forward: ForwardWrapper<TWallet>,
    transports: TransportRegistry,
    sessions: SessionRegistry,
    store: Store,
    retry: RetryPolicy,
    inbound: Option<mpsc::UnboundedSender<InboundFrame>>,
    queue: Option<Arc<dyn MessageQueue>>,
}

impl<TWallet> MessageSender<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(
        wallet: TWallet,
        transports: TransportRegistry,
        sessions: SessionRegistry,
        store: Store,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            packer: EnvelopePacker::new(wallet.clone()),
            forward: ForwardWrapper::new(wallet),
            transports,
            sessions,
            store,
            retry,
            inbound: None,
            queue: None,
        }
    }

    /// `with_inbound` sets where return routed responses are pushed
    pub fn with_inbound(mut self, inbound: mpsc::UnboundedSender<InboundFrame>) -> Self {
        self.inbound = Some(inbound);
        self
    }

    /// `with_queue` enables queued delivery for peers this agent mediates for
    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn sessions(&self) -> SessionRegistry {
        self.sessions.clone()
    }

    pub fn transports(&self) -> TransportRegistry {
        self.transports.clone()
    }

    pub async fn send(&self, ctx: OutboundMessageContext) -> Result<(), SenderError> {
        let sender_key = ctx
            .sender_key
            .clone()
            .or_else(|| ctx.connection.as_ref().and_then(|conn| conn.verkey()));

        let services = self.resolve_services(&ctx);
        let message = self.prepare_message(&ctx)?;
        let payload = serde_json::to_vec(&message)
            .map_err(|err| SenderError::MessageError(err.to_string()))?;

        if let Some(delivered) = self
            .send_over_session(&ctx, &services, &payload, sender_key.as_deref())
            .await
        {
            return delivered;
        }

        let mut last_error = None;
        for service in services.iter() {
            if service.service_endpoint == QUEUE_ENDPOINT
                || !self.transports.is_reachable(&service.service_endpoint)
            {
                debug!("skip unreachable service: {}", service.service_endpoint);
                continue;
            }

            let envelope = self
                .pack_for_service(&payload, service, sender_key.as_deref())
                .await?;

            let bytes = envelope
                .to_bytes()
                .map_err(|err| SenderError::EncryptionError(err.to_string()))?;

            match self.send_with_retry(&service.service_endpoint, bytes).await {
                Ok(response) => {
                    self.push_response(response);
                    return Ok(());
                }
                Err(err) => {
                    warn!("delivery to {} failed: {}", service.service_endpoint, err);
                    last_error = Some(err);
                }
            }
        }

        if let Some(connection) = ctx.connection.as_ref() {
            if let Some(service) = services.first() {
                if self
                    .enqueue_for_recipient(connection, service, &payload, sender_key.as_deref())
                    .await?
                {
                    return Ok(());
                }
            }
        }

        if let Some(err) = last_error {
            return Err(err);
        }

        Err(SenderError::NoReachableEndpoint(
            ctx.connection
                .as_ref()
                .map(|conn| conn.id.clone())
                .unwrap_or_else(|| "no connection".to_string()),
        ))
    }

    /// `pack_for_service` encrypts the payload for the service recipients and wraps it once per
    /// routing key
    pub async fn pack_for_service(
        &self,
        payload: &[u8],
        service: &ResolvedService,
        sender_key: Option<&str>,
    ) -> Result<Envelope, SenderError> {
        let envelope = self
            .packer
            .pack(payload, &service.recipient_keys, sender_key)
            .await
            .map_err(|err| SenderError::EncryptionError(err.to_string()))?;

        self.forward
            .wrap(envelope, &service.routing_keys)
            .await
            .map_err(|err| SenderError::EncryptionError(err.to_string()))
    }

    /// `pack_reply` packs a message sent back over the channel it was requested on, no routing
    /// is involved
    pub async fn pack_reply(
        &self,
        message: &Value,
        recipient_key: &str,
        sender_key: Option<&str>,
    ) -> Result<Vec<u8>, SenderError> {
        let payload = serde_json::to_vec(message)
            .map_err(|err| SenderError::MessageError(err.to_string()))?;

        self.packer
            .pack(&payload, &[recipient_key.to_string()], sender_key)
            .await
            .and_then(|envelope| envelope.to_bytes())
            .map_err(|err| SenderError::EncryptionError(err.to_string()))
    }

    fn resolve_services(&self, ctx: &OutboundMessageContext) -> Vec<ResolvedService> {
        if let Some(service) = ctx.service_override.as_ref() {
            return vec![service.clone()];
        }

        ctx.connection
            .as_ref()
            .and_then(|conn| conn.their_doc.as_ref())
            .map(|doc| doc.services())
            .unwrap_or_default()
    }

    /// `prepare_message` requests a return route when our own document has no endpoint the
    /// peer could use to answer
    fn prepare_message(&self, ctx: &OutboundMessageContext) -> Result<Value, SenderError> {
        let mut message = ctx.message.clone();

        let reachable = ctx
            .connection
            .as_ref()
            .map(|conn| {
                conn.did_doc
                    .services()
                    .iter()
                    .any(|service| service.service_endpoint != QUEUE_ENDPOINT)
            })
            .unwrap_or(false);

        let header = MessageHeader::from_value(&message)
            .map_err(|err| SenderError::MessageError(err.to_string()))?;

        if !reachable && !header.has_return_route() {
            let decorator = serde_json::to_value(TransportDecorator {
                return_route: Some(RETURN_ROUTE_ALL.to_string()),
            })
            .map_err(|err| SenderError::MessageError(err.to_string()))?;

            if let Some(object) = message.as_object_mut() {
                object.insert("~transport".to_string(), decorator);
            }
        }

        Ok(message)
    }

    /// `send_over_session` gives `None` when no session can carry the message. A session
    /// explicitly bound to the context never falls back to the services, a reply bound to a
    /// dropped session is lost with it.
    async fn send_over_session(
        &self,
        ctx: &OutboundMessageContext,
        services: &[ResolvedService],
        payload: &[u8],
        sender_key: Option<&str>,
    ) -> Option<Result<(), SenderError>> {
        let bound = ctx.session.is_some();
        let session = match ctx.session.clone() {
            Some(session) => Some(session),
            None => match ctx.connection.as_ref() {
                Some(conn) => self.sessions.find(&conn.id).await,
                None => None,
            },
        }?;

        let recipient_keys = services.first()?.recipient_keys.clone();
        let envelope = match self
            .packer
            .pack(payload, &recipient_keys, sender_key)
            .await
            .and_then(|envelope| envelope.to_bytes())
        {
            Ok(bytes) => bytes,
            Err(err) => return Some(Err(SenderError::EncryptionError(err.to_string()))),
        };

        match session.send(envelope).await {
            Ok(_) => Some(Ok(())),
            Err(err) if bound => Some(Err(SenderError::TransportError(err.to_string()))),
            Err(err) => {
                debug!("session delivery failed, fallback to services: {}", err);
                None
            }
        }
    }

    async fn send_with_retry(
        &self,
        endpoint: &str,
        bytes: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, SenderError> {
        let transport = self
            .transports
            .outbound_for(endpoint)
            .map_err(|err| SenderError::TransportError(err.to_string()))?;

        let mut backoff = ReconnectBackoff::new(self.retry.base, self.retry.cap);
        let budget = self.retry.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match transport.send(endpoint, bytes.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < budget => {
                    let delay = backoff.next_delay();
                    warn!(
                        "transient failure to {}, attempt {}/{}, retry in {:?}: {}",
                        endpoint, attempt, budget, delay, err
                    );

                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(SenderError::TransportError(err.to_string())),
            }
        }
    }

    fn push_response(&self, response: Option<Vec<u8>>) {
        let bytes = match response {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return,
        };

        match self.inbound.as_ref() {
            Some(inbound) => {
                if inbound.send(InboundFrame::new(bytes, None)).is_err() {
                    warn!("inbound queue closed, return routed message dropped");
                }
            }
            None => warn!("no inbound queue, return routed message dropped"),
        }
    }

    /// `enqueue_for_recipient` is used by a mediator to keep a message for a recipient that
    /// has no endpoint until it picks it up
    async fn enqueue_for_recipient(
        &self,
        connection: &ConnectionRecord,
        service: &ResolvedService,
        payload: &[u8],
        sender_key: Option<&str>,
    ) -> Result<bool, SenderError> {
        let queue = match self.queue.as_ref() {
            Some(queue) => queue,
            None => return Ok(false),
        };

        let query = Query::new()
            .with_tag("connection_id", &connection.id)
            .with_tag("role", MediationRole::Mediator.as_str())
            .with_tag("state", MediationState::Granted.as_str());

        let mediation = self
            .store
            .find_single_by_query::<MediationRecord>(&query)
            .await
            .map_err(|err| SenderError::QueueError(err.to_string()))?;

        if mediation.is_none() {
            return Ok(false);
        }

        let recipient_key = service.recipient_keys.first().cloned().unwrap_or_default();
        let envelope = self
            .packer
            .pack(payload, &service.recipient_keys, sender_key)
            .await
            .map_err(|err| SenderError::EncryptionError(err.to_string()))?;

        queue
            .add(QueuedMessage {
                id: Uuid::new_v4().to_string(),
                connection_id: connection.id.clone(),
                recipient_key,
                encrypted_message: envelope,
                received_at: Utc::now(),
            })
            .await
            .map_err(|err| SenderError::QueueError(err.to_string()))?;

        debug!("message queued for connection: {}", connection.id);
        Ok(true)
    }
}
