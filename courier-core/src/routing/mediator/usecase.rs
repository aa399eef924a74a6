use std::sync::Arc;

use rst_common::standard::chrono::Utc;
use rst_common::standard::uuid::Uuid;
use rst_common::with_logging::log::{debug, info, warn};

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::events::{AgentEvent, EventEmitter};
use crate::didcomm::message::{AgentMessage, ForwardMessage, MessageHeader};
use crate::didcomm::sender::MessageSender;
use crate::identity::connection::ConnectionRecord;
use crate::identity::did::{did_key_to_verkey, is_did_key};
use crate::routing::mediation::messages::{
    KeylistUpdate, KeylistUpdateResponse, KeylistUpdated, MediationDeny, MediationGrant,
};
use crate::routing::mediation::types::{
    KeylistAction, KeylistResult, MediationRole, MediationState,
};
use crate::routing::mediation::{recipient_key_tag, MediationRecord};
use crate::routing::pickup::messages::{
    Batch, BatchMessage, BatchPickup, Delivery, DeliveryRequest, LiveDeliveryChange,
    MessagesReceived, Status,
};
use crate::storage::types::{Query, StorageError};
use crate::storage::Store;
use crate::wallet::types::Wallet;

use super::types::{
    MediatorConfig, MediatorError, MediatorRoutingRecord, MessageQueue, QueuedMessage,
    MEDIATOR_ROUTING_RECORD_ID,
};

const UPDATE_ATTEMPTS: usize = 5;

fn storage_error(err: StorageError) -> MediatorError {
    match err {
        StorageError::RecordNotFound(msg) => MediatorError::RecordNotFound(msg),
        _ => MediatorError::StorageError(err.to_string()),
    }
}

fn message_error<E: ToString>(err: E) -> MediatorError {
    MediatorError::MessageError(err.to_string())
}

/// `MediatorUsecase` implements the mediator role
#[derive(Clone)]
pub struct MediatorUsecase<TWallet>
where
    TWallet: Wallet,
{
    wallet: TWallet,
    store: Store,
    events: EventEmitter,
    sender: MessageSender<TWallet>,
    queue: Arc<dyn MessageQueue>,
    config: MediatorConfig,
}

impl<TWallet> MediatorUsecase<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(
        wallet: TWallet,
        store: Store,
        events: EventEmitter,
        sender: MessageSender<TWallet>,
        queue: Arc<dyn MessageQueue>,
        config: MediatorConfig,
    ) -> Self {
        Self {
            wallet,
            store,
            events,
            sender,
            queue,
            config,
        }
    }

    pub fn queue(&self) -> Arc<dyn MessageQueue> {
        self.queue.clone()
    }

    /// `routing_keys` creates the shared routing key on first use
    pub async fn routing_keys(&self) -> Result<Vec<String>, MediatorError> {
        let existing = self
            .store
            .find_by_id::<MediatorRoutingRecord>(MEDIATOR_ROUTING_RECORD_ID)
            .await
            .map_err(storage_error)?;

        if let Some(record) = existing {
            return Ok(record.routing_keys);
        }

        let routing_key = self
            .wallet
            .create_key()
            .await
            .map_err(|err| MediatorError::WalletError(err.to_string()))?;

        let mut record = MediatorRoutingRecord::new(routing_key);
        match self.store.save(&mut record).await {
            Ok(_) => {
                info!("mediator routing key created: {:?}", record.routing_keys);
                Ok(record.routing_keys)
            }
            Err(StorageError::RecordDuplicate(_)) => self
                .store
                .get_by_id::<MediatorRoutingRecord>(MEDIATOR_ROUTING_RECORD_ID)
                .await
                .map(|record| record.routing_keys)
                .map_err(storage_error),
            Err(err) => Err(storage_error(err)),
        }
    }

    pub async fn get_by_id(&self, mediation_id: &str) -> Result<MediationRecord, MediatorError> {
        let record = self
            .store
            .get_by_id::<MediationRecord>(mediation_id)
            .await
            .map_err(storage_error)?;

        record
            .assert_role(MediationRole::Mediator)
            .map_err(|err| MediatorError::InvalidState(err.to_string()))?;

        Ok(record)
    }

    /// `find_by_connection_id` gives the mediation this mediator keeps for a recipient
    pub async fn find_by_connection_id(
        &self,
        connection_id: &str,
    ) -> Result<Option<MediationRecord>, MediatorError> {
        let query = Query::new()
            .with_tag("role", MediationRole::Mediator.as_str())
            .with_tag("connection_id", connection_id);

        self.store
            .find_single_by_query::<MediationRecord>(&query)
            .await
            .map_err(storage_error)
    }

    async fn find_granted(&self, connection_id: &str) -> Result<MediationRecord, MediatorError> {
        self.find_by_connection_id(connection_id)
            .await?
            .filter(|record| record.is_granted())
            .ok_or(MediatorError::InvalidState(format!(
                "no granted mediation for connection {}",
                connection_id
            )))
    }

    async fn get_connection(&self, connection_id: &str) -> Result<ConnectionRecord, MediatorError> {
        self.store
            .get_by_id::<ConnectionRecord>(connection_id)
            .await
            .map_err(storage_error)
    }

    async fn update_state(
        &self,
        record: &mut MediationRecord,
        state: MediationState,
    ) -> Result<(), MediatorError> {
        let previous = record
            .set_state(state)
            .map_err(|err| MediatorError::InvalidState(err.to_string()))?;

        self.store.update(record).await.map_err(storage_error)?;
        self.events.emit(AgentEvent::MediationStateChanged {
            mediation_id: record.id.clone(),
            previous: Some(previous),
            state: record.state,
        });

        Ok(())
    }

    async fn create_grant(
        &self,
        record: &MediationRecord,
        connection: ConnectionRecord,
    ) -> Result<OutboundMessageContext, MediatorError> {
        let grant = MediationGrant {
            header: MessageHeader::new(MediationGrant::TYPE)
                .with_thread(Some(record.thread_id.clone()), None),
            endpoint: self.config.endpoint.clone(),
            routing_keys: self.routing_keys().await?,
        };

        OutboundMessageContext::new(&grant, Some(connection))
            .map(|ctx| ctx.with_associated_record(&record.id))
            .map_err(message_error)
    }

    pub async fn process_mediation_request(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, MediatorError> {
        let connection = ctx.assert_ready_connection().map_err(message_error)?.clone();

        if let Some(existing) = self.find_by_connection_id(&connection.id).await? {
            if existing.is_granted() {
                debug!("mediation already granted, grant sent again: {}", existing.id);
                return self.create_grant(&existing, connection).await.map(Some);
            }

            return Err(MediatorError::InvalidState(format!(
                "mediation {} for connection {} is {}",
                existing.id, connection.id, existing.state
            )));
        }

        let mut record = MediationRecord::new(
            MediationRole::Mediator,
            MediationState::Requested,
            &connection.id,
            &ctx.header.thread_id(),
        );

        self.store.save(&mut record).await.map_err(storage_error)?;
        self.events.emit(AgentEvent::MediationStateChanged {
            mediation_id: record.id.clone(),
            previous: None,
            state: record.state,
        });

        if !self.config.auto_accept_mediation_requests {
            info!("mediation request waiting for approval: {}", record.id);
            return Ok(None);
        }

        self.update_state(&mut record, MediationState::Granted).await?;
        info!("mediation granted to connection: {}", connection.id);
        self.create_grant(&record, connection).await.map(Some)
    }

    /// `grant` approves a pending request and sends the grant
    pub async fn grant(&self, mediation_id: &str) -> Result<MediationRecord, MediatorError> {
        let mut record = self.get_by_id(mediation_id).await?;
        self.update_state(&mut record, MediationState::Granted).await?;

        let connection = self.get_connection(&record.connection_id).await?;
        let ctx = self.create_grant(&record, connection).await?;
        self.sender
            .send(ctx)
            .await
            .map_err(|err| MediatorError::SendError(err.to_string()))?;

        Ok(record)
    }

    pub async fn deny(&self, mediation_id: &str) -> Result<MediationRecord, MediatorError> {
        let mut record = self.get_by_id(mediation_id).await?;
        self.update_state(&mut record, MediationState::Denied).await?;

        let deny = MediationDeny {
            header: MessageHeader::new(MediationDeny::TYPE)
                .with_thread(Some(record.thread_id.clone()), None),
        };

        let connection = self.get_connection(&record.connection_id).await?;
        let ctx = OutboundMessageContext::new(&deny, Some(connection)).map_err(message_error)?;
        self.sender
            .send(ctx)
            .await
            .map_err(|err| MediatorError::SendError(err.to_string()))?;

        Ok(record)
    }

    pub async fn process_keylist_update(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, MediatorError> {
        let connection = ctx.assert_ready_connection().map_err(message_error)?.clone();
        let update = ctx.message_as::<KeylistUpdate>().map_err(message_error)?;

        let mut attempt = 0;
        let (record, updated) = loop {
            attempt += 1;

            let mut record = self.find_granted(&connection.id).await?;
            let mut updated = Vec::new();

            for item in update.updates.iter() {
                let key = if is_did_key(&item.recipient_key) {
                    did_key_to_verkey(&item.recipient_key).ok()
                } else {
                    Some(item.recipient_key.clone())
                };

                let result = match (key, item.action) {
                    (None, _) => KeylistResult::ClientError,
                    (Some(key), KeylistAction::Add) if record.add_recipient_key(&key) => {
                        KeylistResult::Success
                    }
                    (Some(key), KeylistAction::Remove) if record.remove_recipient_key(&key) => {
                        KeylistResult::Success
                    }
                    (Some(_), _) => KeylistResult::NoChange,
                };

                updated.push(KeylistUpdated {
                    recipient_key: item.recipient_key.clone(),
                    action: item.action,
                    result,
                });
            }

            match self.store.update(&mut record).await {
                Ok(_) => break (record, updated),
                Err(StorageError::VersionConflict(msg)) if attempt < UPDATE_ATTEMPTS => {
                    debug!("keylist update conflict, reload: {}", msg);
                    continue;
                }
                Err(err) => return Err(storage_error(err)),
            }
        };

        self.events.emit(AgentEvent::KeylistUpdated {
            mediation_id: record.id.clone(),
            keys: updated
                .iter()
                .filter(|item| item.result == KeylistResult::Success)
                .map(|item| item.recipient_key.clone())
                .collect(),
        });

        let response = KeylistUpdateResponse {
            header: MessageHeader::new(KeylistUpdateResponse::TYPE)
                .with_thread(Some(update.thread_id()), None),
            updated,
        };

        OutboundMessageContext::new(&response, Some(connection))
            .map(Some)
            .map_err(message_error)
    }

    /// `process_forward` queues the inner envelope for the owner of the `to` key and pushes it
    /// at once when the recipient holds a live session. The message stays queued until the
    /// recipient acknowledges it.
    pub async fn process_forward(&self, ctx: &InboundMessageContext) -> Result<(), MediatorError> {
        let forward = ctx.message_as::<ForwardMessage>().map_err(message_error)?;

        let to = if is_did_key(&forward.to) {
            did_key_to_verkey(&forward.to).map_err(message_error)?
        } else {
            forward.to.clone()
        };

        let query = Query::new()
            .with_tag("role", MediationRole::Mediator.as_str())
            .with_tag("state", MediationState::Granted.as_str())
            .with_tag(&recipient_key_tag(&to), "true");

        let mediation = self
            .store
            .find_single_by_query::<MediationRecord>(&query)
            .await
            .map_err(storage_error)?
            .ok_or(MediatorError::UnknownRecipient(to.clone()))?;

        let message = QueuedMessage {
            id: Uuid::new_v4().to_string(),
            connection_id: mediation.connection_id.clone(),
            recipient_key: to,
            encrypted_message: forward.msg,
            received_at: Utc::now(),
        };

        self.queue.add(message.clone()).await?;
        debug!(
            "forward queued for connection {}: {}",
            mediation.connection_id, message.id
        );

        let session = match self.sender.sessions().find(&mediation.connection_id).await {
            Some(session) => session,
            None => return Ok(()),
        };

        let connection = self.get_connection(&mediation.connection_id).await?;
        let delivery = Delivery::new(vec![(message.id.clone(), message.encrypted_message)])
            .map_err(message_error)?;

        let ctx = OutboundMessageContext::new(&delivery, Some(connection))
            .map_err(message_error)?
            .with_session(Some(session));

        if let Err(err) = self.sender.send(ctx).await {
            warn!("live delivery failed, message kept queued: {}", err);
        }

        Ok(())
    }

    pub async fn process_batch_pickup(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, MediatorError> {
        let connection = ctx.assert_ready_connection().map_err(message_error)?.clone();
        let pickup = ctx.message_as::<BatchPickup>().map_err(message_error)?;
        self.find_granted(&connection.id).await?;

        let messages = self.queue.take(&connection.id, pickup.batch_size).await?;
        let batch = Batch {
            header: MessageHeader::new(Batch::TYPE).with_thread(Some(pickup.thread_id()), None),
            messages: messages
                .into_iter()
                .map(|message| BatchMessage {
                    id: message.id,
                    message: message.encrypted_message,
                })
                .collect(),
        };

        OutboundMessageContext::new(&batch, Some(connection))
            .map(Some)
            .map_err(message_error)
    }

    async fn status(
        &self,
        connection: ConnectionRecord,
        thread_id: String,
    ) -> Result<OutboundMessageContext, MediatorError> {
        let count = self.queue.count(&connection.id).await?;
        let live = self.sender.sessions().find(&connection.id).await.is_some();

        let mut status = Status::new(count, Some(live));
        status.header = status.header.with_thread(Some(thread_id), None);

        OutboundMessageContext::new(&status, Some(connection)).map_err(message_error)
    }

    pub async fn process_status_request(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, MediatorError> {
        let connection = ctx.assert_ready_connection().map_err(message_error)?.clone();
        self.find_granted(&connection.id).await?;

        self.status(connection, ctx.header.thread_id()).await.map(Some)
    }

    pub async fn process_delivery_request(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, MediatorError> {
        let connection = ctx.assert_ready_connection().map_err(message_error)?.clone();
        let request = ctx.message_as::<DeliveryRequest>().map_err(message_error)?;
        self.find_granted(&connection.id).await?;

        let messages = self.queue.peek(&connection.id, request.limit).await?;
        if messages.is_empty() {
            return self.status(connection, request.thread_id()).await.map(Some);
        }

        let mut delivery = Delivery::new(
            messages
                .into_iter()
                .map(|message| (message.id, message.encrypted_message))
                .collect(),
        )
        .map_err(message_error)?;

        delivery.header = delivery
            .header
            .with_thread(Some(request.thread_id()), None);

        OutboundMessageContext::new(&delivery, Some(connection))
            .map(Some)
            .map_err(message_error)
    }

    pub async fn process_messages_received(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, MediatorError> {
        let connection = ctx.assert_ready_connection().map_err(message_error)?.clone();
        let received = ctx.message_as::<MessagesReceived>().map_err(message_error)?;

        let removed = self
            .queue
            .remove(&connection.id, &received.message_id_list)
            .await?;

        debug!(
            "messages acknowledged by connection {}: {}",
            connection.id, removed
        );

        self.status(connection, received.thread_id()).await.map(Some)
    }

    /// `process_live_delivery_change` binds the session the request arrived on to the
    /// recipient connection
    pub async fn process_live_delivery_change(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, MediatorError> {
        let connection = ctx.assert_ready_connection().map_err(message_error)?.clone();
        let change = ctx.message_as::<LiveDeliveryChange>().map_err(message_error)?;
        self.find_granted(&connection.id).await?;

        let sessions = self.sender.sessions();
        match (change.live_delivery, ctx.session.clone()) {
            (true, Some(session)) => {
                sessions.register(&connection.id, session).await;
                info!("live delivery enabled for connection: {}", connection.id);
            }
            (true, None) => {
                return Err(MediatorError::InvalidState(
                    "live delivery needs a persistent session".to_string(),
                ))
            }
            (false, _) => {
                sessions.remove(&connection.id).await;
                info!("live delivery disabled for connection: {}", connection.id);
            }
        }

        self.status(connection, change.thread_id()).await.map(Some)
    }
}
