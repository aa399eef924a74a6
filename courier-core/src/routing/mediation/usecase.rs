use std::time::Duration;

use rst_common::standard::async_trait::async_trait;
use rst_common::with_logging::log::{debug, info, warn};

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::events::{wait_for, AgentEvent, EventEmitter};
use crate::didcomm::message::AgentMessage;
use crate::didcomm::sender::MessageSender;
use crate::identity::connection::ConnectionRecord;
use crate::identity::did::{did_key_to_verkey, is_did_key};
use crate::storage::types::{Query, StorageError};
use crate::storage::Store;
use crate::wallet::types::Wallet;

use super::mediation::MediationRecord;
use super::messages::{
    KeylistUpdate, KeylistUpdateItem, KeylistUpdateResponse, MediationDeny, MediationGrant,
    MediationRequest,
};
use super::types::{
    KeylistAction, KeylistResult, MediationError, MediationRecipientAPI, MediationRole,
    MediationState, DEFAULT_GRANT_TIMEOUT,
};

const UPDATE_ATTEMPTS: usize = 5;

fn storage_error(err: StorageError) -> MediationError {
    match err {
        StorageError::RecordNotFound(msg) => MediationError::RecordNotFound(msg),
        _ => MediationError::StorageError(err.to_string()),
    }
}

fn normalize_key(key: &str) -> Result<String, MediationError> {
    if is_did_key(key) {
        return did_key_to_verkey(key).map_err(|err| MediationError::MessageError(err.to_string()));
    }

    Ok(key.to_string())
}

/// `MediationRecipientUsecase` drives the mediation records of the recipient role
#[derive(Clone)]
pub struct MediationRecipientUsecase<TWallet>
where
    TWallet: Wallet,
{
    store: Store,
    events: EventEmitter,
    sender: MessageSender<TWallet>,
}

impl<TWallet> MediationRecipientUsecase<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(store: Store, events: EventEmitter, sender: MessageSender<TWallet>) -> Self {
        Self {
            store,
            events,
            sender,
        }
    }

    async fn get_ready_connection(
        &self,
        connection_id: &str,
    ) -> Result<ConnectionRecord, MediationError> {
        let connection = self
            .store
            .get_by_id::<ConnectionRecord>(connection_id)
            .await
            .map_err(storage_error)?;

        if !connection.is_ready() {
            return Err(MediationError::InvalidState(format!(
                "connection {} is {}",
                connection.id, connection.state
            )));
        }

        Ok(connection)
    }

    pub async fn get_by_id(&self, mediation_id: &str) -> Result<MediationRecord, MediationError> {
        self.store
            .get_by_id::<MediationRecord>(mediation_id)
            .await
            .map_err(storage_error)
    }

    async fn find_by_thread(
        &self,
        connection_id: &str,
        thread_id: &str,
    ) -> Result<MediationRecord, MediationError> {
        let query = Query::new()
            .with_tag("connection_id", connection_id)
            .with_tag("thread_id", thread_id)
            .with_tag("role", MediationRole::Recipient.as_str());

        self.store
            .find_single_by_query::<MediationRecord>(&query)
            .await
            .map_err(storage_error)?
            .ok_or(MediationError::RecordNotFound(format!(
                "mediation for thread {}",
                thread_id
            )))
    }

    async fn update_state(
        &self,
        record: &mut MediationRecord,
        state: MediationState,
    ) -> Result<(), MediationError> {
        let previous = record.set_state(state)?;
        self.store.update(record).await.map_err(storage_error)?;

        debug!(
            "mediation {} moved from {} to {}",
            record.id, previous, record.state
        );

        self.events.emit(AgentEvent::MediationStateChanged {
            mediation_id: record.id.clone(),
            previous: Some(previous),
            state: record.state,
        });

        Ok(())
    }

    pub async fn process_grant(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<MediationRecord, MediationError> {
        let connection = ctx
            .assert_ready_connection()
            .map_err(|err| MediationError::MessageError(err.to_string()))?;

        let grant = ctx
            .message_as::<MediationGrant>()
            .map_err(|err| MediationError::MessageError(err.to_string()))?;

        let mut record = self.find_by_thread(&connection.id, &grant.thread_id()).await?;
        record.assert_state(MediationState::Requested)?;

        record.endpoint = Some(grant.endpoint.clone());
        record.routing_keys = grant
            .routing_keys
            .iter()
            .map(|key| normalize_key(key))
            .collect::<Result<Vec<String>, MediationError>>()?;

        self.update_state(&mut record, MediationState::Granted).await?;
        info!("mediation granted by connection: {}", connection.id);
        Ok(record)
    }

    pub async fn process_deny(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<MediationRecord, MediationError> {
        let connection = ctx
            .assert_ready_connection()
            .map_err(|err| MediationError::MessageError(err.to_string()))?;

        let deny = ctx
            .message_as::<MediationDeny>()
            .map_err(|err| MediationError::MessageError(err.to_string()))?;

        let mut record = self.find_by_thread(&connection.id, &deny.thread_id()).await?;
        record.assert_state(MediationState::Requested)?;

        self.update_state(&mut record, MediationState::Denied).await?;
        warn!("mediation denied by connection: {}", connection.id);
        Ok(record)
    }

    /// `process_keylist_update_response` applies the keys the mediator confirmed, concurrent
    /// responses for the same mediation are merged by reloading on a version conflict
    pub async fn process_keylist_update_response(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<MediationRecord, MediationError> {
        let connection = ctx
            .assert_ready_connection()
            .map_err(|err| MediationError::MessageError(err.to_string()))?;

        let response = ctx
            .message_as::<KeylistUpdateResponse>()
            .map_err(|err| MediationError::MessageError(err.to_string()))?;

        let confirmed: Vec<(String, KeylistAction)> = response
            .updated
            .iter()
            .filter(|item| {
                matches!(item.result, KeylistResult::Success | KeylistResult::NoChange)
            })
            .map(|item| normalize_key(&item.recipient_key).map(|key| (key, item.action)))
            .collect::<Result<Vec<(String, KeylistAction)>, MediationError>>()?;

        for item in response.updated.iter() {
            if !matches!(item.result, KeylistResult::Success | KeylistResult::NoChange) {
                warn!(
                    "keylist update rejected for {}: {:?}",
                    item.recipient_key, item.result
                );
            }
        }

        let mediation_id = self
            .find_by_connection_id(&connection.id)
            .await?
            .ok_or(MediationError::RecordNotFound(format!(
                "mediation for connection {}",
                connection.id
            )))?
            .id;

        let mut attempt = 0;
        let record = loop {
            attempt += 1;

            let mut record = self.get_by_id(&mediation_id).await?;
            for (key, action) in confirmed.iter() {
                match action {
                    KeylistAction::Add => record.add_recipient_key(key),
                    KeylistAction::Remove => record.remove_recipient_key(key),
                };
            }

            match self.store.update(&mut record).await {
                Ok(_) => break record,
                Err(StorageError::VersionConflict(msg)) if attempt < UPDATE_ATTEMPTS => {
                    debug!("keylist update conflict, reload: {}", msg);
                    continue;
                }
                Err(err) => return Err(storage_error(err)),
            }
        };

        self.events.emit(AgentEvent::KeylistUpdated {
            mediation_id: record.id.clone(),
            keys: confirmed.into_iter().map(|(key, _)| key).collect(),
        });

        Ok(record)
    }

    /// `keylist_update_and_wait` registers a key and resolves once the mediator confirmed it
    pub async fn keylist_update_and_wait(
        &self,
        mediation_id: &str,
        verkey: &str,
        action: KeylistAction,
        timeout: Duration,
    ) -> Result<MediationRecord, MediationError> {
        let mut receiver = self.events.subscribe();
        self.keylist_update(mediation_id, verkey, action).await?;

        let expected_id = mediation_id.to_string();
        let expected_key = verkey.to_string();
        wait_for(&mut receiver, timeout, |event| match event {
            AgentEvent::KeylistUpdated { mediation_id, keys } => {
                mediation_id == &expected_id && keys.contains(&expected_key)
            }
            _ => false,
        })
        .await
        .map_err(|err| MediationError::Timeout(err.to_string()))?;

        self.get_by_id(mediation_id).await
    }
}

#[async_trait]
impl<TWallet> MediationRecipientAPI for MediationRecipientUsecase<TWallet>
where
    TWallet: Wallet,
{
    async fn request_mediation(
        &self,
        connection_id: &str,
    ) -> Result<MediationRecord, MediationError> {
        let connection = self.get_ready_connection(connection_id).await?;

        let request = MediationRequest::new();
        let mut record = MediationRecord::new(
            MediationRole::Recipient,
            MediationState::Requested,
            &connection.id,
            &request.thread_id(),
        );

        self.store.save(&mut record).await.map_err(storage_error)?;
        self.events.emit(AgentEvent::MediationStateChanged {
            mediation_id: record.id.clone(),
            previous: None,
            state: record.state,
        });

        let ctx = OutboundMessageContext::new(&request, Some(connection))
            .map_err(|err| MediationError::MessageError(err.to_string()))?
            .with_associated_record(&record.id);

        self.sender
            .send(ctx)
            .await
            .map_err(|err| MediationError::SendError(err.to_string()))?;

        Ok(record)
    }

    async fn request_and_await_grant(
        &self,
        connection_id: &str,
        timeout: Option<Duration>,
    ) -> Result<MediationRecord, MediationError> {
        let mut receiver = self.events.subscribe();
        let record = self.request_mediation(connection_id).await?;

        let expected_id = record.id.clone();
        wait_for(
            &mut receiver,
            timeout.unwrap_or(DEFAULT_GRANT_TIMEOUT),
            |event| match event {
                AgentEvent::MediationStateChanged {
                    mediation_id,
                    state,
                    ..
                } => mediation_id == &expected_id && *state != MediationState::Requested,
                _ => false,
            },
        )
        .await
        .map_err(|err| MediationError::Timeout(err.to_string()))?;

        let record = self.get_by_id(&record.id).await?;
        match record.state {
            MediationState::Granted => Ok(record),
            _ => Err(MediationError::Denied(record.id)),
        }
    }

    async fn keylist_update(
        &self,
        mediation_id: &str,
        verkey: &str,
        action: KeylistAction,
    ) -> Result<(), MediationError> {
        let record = self.get_by_id(mediation_id).await?;
        record.assert_role(MediationRole::Recipient)?;
        record.assert_state(MediationState::Granted)?;

        let connection = self.get_ready_connection(&record.connection_id).await?;
        let message = KeylistUpdate::new(vec![KeylistUpdateItem {
            recipient_key: verkey.to_string(),
            action,
        }]);

        let ctx = OutboundMessageContext::new(&message, Some(connection))
            .map_err(|err| MediationError::MessageError(err.to_string()))?
            .with_associated_record(&record.id);

        self.sender
            .send(ctx)
            .await
            .map_err(|err| MediationError::SendError(err.to_string()))
    }

    async fn find_default_mediator(&self) -> Result<Option<MediationRecord>, MediationError> {
        let query = Query::new()
            .with_tag("role", MediationRole::Recipient.as_str())
            .with_tag("state", MediationState::Granted.as_str())
            .with_tag("default", "true");

        self.store
            .find_single_by_query::<MediationRecord>(&query)
            .await
            .map_err(storage_error)
    }

    /// `set_default_mediator` clears the flag of any other record first so there is never more
    /// than one default
    async fn set_default_mediator(
        &self,
        mediation_id: &str,
    ) -> Result<MediationRecord, MediationError> {
        let mut record = self.get_by_id(mediation_id).await?;
        record.assert_role(MediationRole::Recipient)?;
        record.assert_state(MediationState::Granted)?;

        let query = Query::new()
            .with_tag("role", MediationRole::Recipient.as_str())
            .with_tag("default", "true");

        let defaults = self
            .store
            .find_by_query::<MediationRecord>(&query)
            .await
            .map_err(storage_error)?;

        for mut other in defaults.into_iter().filter(|other| other.id != record.id) {
            other.default = false;
            self.store.update(&mut other).await.map_err(storage_error)?;
        }

        if !record.default {
            record.default = true;
            self.store.update(&mut record).await.map_err(storage_error)?;
        }

        Ok(record)
    }

    async fn get_mediators(&self) -> Result<Vec<MediationRecord>, MediationError> {
        let query = Query::new().with_tag("role", MediationRole::Recipient.as_str());
        self.store
            .find_by_query::<MediationRecord>(&query)
            .await
            .map_err(storage_error)
    }

    async fn find_by_connection_id(
        &self,
        connection_id: &str,
    ) -> Result<Option<MediationRecord>, MediationError> {
        let query = Query::new()
            .with_tag("role", MediationRole::Recipient.as_str())
            .with_tag("connection_id", connection_id);

        self.store
            .find_single_by_query::<MediationRecord>(&query)
            .await
            .map_err(storage_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rst_common::standard::serde_json::json;
    use rst_common::with_tokio::tokio;

    use crate::didcomm::sender::types::RetryPolicy;
    use crate::didcomm::transport::{SessionRegistry, TransportRegistry};
    use crate::identity::connection::types::{
        ConnectionRole, ConnectionState, HandshakeProtocol,
    };
    use crate::identity::did::types::DidDoc;
    use crate::identity::did::verkey_to_did_key;
    use crate::wallet::LocalWallet;

    const VERKEY: &str = "8HH5gYEeNc3z7PYXmd54d4x6qAfCNrqQqEB3nS7Zfu7K";

    fn usecase(store: Store, events: EventEmitter) -> MediationRecipientUsecase<LocalWallet> {
        let sender = MessageSender::new(
            LocalWallet::new(),
            TransportRegistry::new(),
            SessionRegistry::new(),
            store.clone(),
            RetryPolicy::default(),
        );

        MediationRecipientUsecase::new(store, events, sender)
    }

    async fn connection(store: &Store) -> ConnectionRecord {
        let doc = DidDoc::new("did-1", "key-1", &["memory://me".to_string()], &[]);
        let mut record = ConnectionRecord::new(
            ConnectionRole::Requester,
            HandshakeProtocol::DidExchange,
            ConnectionState::Complete,
            "did-1".to_string(),
            doc,
            "thread-1".to_string(),
        );

        store.save(&mut record).await.unwrap();
        record
    }

    async fn mediation(store: &Store, connection_id: &str, state: MediationState) -> MediationRecord {
        let mut record = MediationRecord::new(
            MediationRole::Recipient,
            state,
            connection_id,
            "mediation-thread",
        );

        store.save(&mut record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_process_grant() {
        let store = Store::in_memory();
        let events = EventEmitter::default();
        let mut receiver = events.subscribe();

        let connection = connection(&store).await;
        let record = mediation(&store, &connection.id, MediationState::Requested).await;

        let grant = json!({
            "@id": "grant-1",
            "@type": MediationGrant::TYPE,
            "~thread": {"thid": "mediation-thread"},
            "endpoint": "memory://mediator",
            "routing_keys": [verkey_to_did_key(VERKEY).unwrap()]
        });

        let ctx = InboundMessageContext::new(grant, None, None)
            .unwrap()
            .with_connection(Some(connection));

        let granted = usecase(store.clone(), events).process_grant(&ctx).await.unwrap();
        assert_eq!(granted.id, record.id);
        assert_eq!(granted.state, MediationState::Granted);
        assert_eq!(granted.endpoint, Some("memory://mediator".to_string()));
        assert_eq!(granted.routing_keys, vec![VERKEY.to_string()]);

        let event = receiver.recv().await.unwrap();
        assert!(matches!(
            event,
            AgentEvent::MediationStateChanged {
                state: MediationState::Granted,
                ..
            }
        ))
    }

    #[tokio::test]
    async fn test_process_deny_twice() {
        let store = Store::in_memory();
        let connection = connection(&store).await;
        mediation(&store, &connection.id, MediationState::Requested).await;

        let deny = json!({
            "@id": "deny-1",
            "@type": MediationDeny::TYPE,
            "~thread": {"thid": "mediation-thread"}
        });

        let ctx = InboundMessageContext::new(deny, None, None)
            .unwrap()
            .with_connection(Some(connection));

        let usecase = usecase(store, EventEmitter::default());
        let denied = usecase.process_deny(&ctx).await.unwrap();
        assert_eq!(denied.state, MediationState::Denied);

        let again = usecase.process_deny(&ctx).await;
        assert!(matches!(
            again.unwrap_err(),
            MediationError::InvalidState(_)
        ))
    }

    #[tokio::test]
    async fn test_keylist_update_response_adds_keys() {
        let store = Store::in_memory();
        let events = EventEmitter::default();
        let mut receiver = events.subscribe();

        let connection = connection(&store).await;
        let record = mediation(&store, &connection.id, MediationState::Granted).await;

        let response = json!({
            "@id": "response-1",
            "@type": KeylistUpdateResponse::TYPE,
            "updated": [
                {"recipient_key": "key-a", "action": "add", "result": "success"},
                {"recipient_key": "key-b", "action": "add", "result": "server_error"}
            ]
        });

        let ctx = InboundMessageContext::new(response, None, None)
            .unwrap()
            .with_connection(Some(connection));

        let updated = usecase(store, events)
            .process_keylist_update_response(&ctx)
            .await
            .unwrap();

        assert_eq!(updated.id, record.id);
        assert_eq!(updated.recipient_keys, vec!["key-a".to_string()]);

        let event = receiver.recv().await.unwrap();
        assert_eq!(
            event,
            AgentEvent::KeylistUpdated {
                mediation_id: record.id,
                keys: vec!["key-a".to_string()],
            }
        )
    }

    #[tokio::test]
    async fn test_single_default_mediator() {
        let store = Store::in_memory();
        let connection = connection(&store).await;
        let first = mediation(&store, &connection.id, MediationState::Granted).await;
        let second = mediation(&store, "conn-2", MediationState::Granted).await;
        let requested = mediation(&store, "conn-3", MediationState::Requested).await;

        let usecase = usecase(store, EventEmitter::default());
        assert!(usecase.find_default_mediator().await.unwrap().is_none());

        usecase.set_default_mediator(&first.id).await.unwrap();
        usecase.set_default_mediator(&second.id).await.unwrap();

        let default = usecase.find_default_mediator().await.unwrap().unwrap();
        assert_eq!(default.id, second.id);
        assert!(!usecase.get_by_id(&first.id).await.unwrap().default);

        let result = usecase.set_default_mediator(&requested.id).await;
        assert!(matches!(
            result.unwrap_err(),
            MediationError::InvalidState(_)
        ));

        assert_eq!(usecase.get_mediators().await.unwrap().len(), 3);
        assert_eq!(
            usecase
                .find_by_connection_id(&connection.id)
                .await
                .unwrap()
                .map(|record| record.id),
            Some(first.id)
        )
    }

    #[tokio::test]
    async fn test_request_mediation_needs_ready_connection() {
        let store = Store::in_memory();
        let usecase = usecase(store, EventEmitter::default());

        let result = usecase.request_mediation("missing").await;
        assert!(matches!(
            result.unwrap_err(),
            MediationError::RecordNotFound(_)
        ))
    }
}
