use rst_common::standard::async_trait::async_trait;
use rst_common::with_logging::log::{debug, info, warn};

use crate::didcomm::events::{AgentEvent, EventEmitter};
use crate::didcomm::message::AgentMessage;
use crate::didcomm::sender::MessageSender;
use crate::identity::connection::types::{
    AcceptConfig, ConnectionAPI, ConnectionError, HandshakeConfig,
};
use crate::identity::connection::{ConnectionRecord, ConnectionUsecase};
use crate::routing::RoutingService;
use crate::storage::types::{Query, StorageError};
use crate::storage::Store;
use crate::wallet::types::Wallet;

use super::messages::{InlineService, OutOfBandInvitation};
use super::out_of_band::OutOfBandRecord;
use super::types::{CreateInvitationConfig, OobRole, OobState, OutOfBandAPI, OutOfBandError};

fn storage_error(err: StorageError) -> OutOfBandError {
    match err {
        StorageError::RecordNotFound(msg) => OutOfBandError::RecordNotFound(msg),
        StorageError::VersionConflict(msg) => OutOfBandError::InvalidState(msg),
        _ => OutOfBandError::StorageError(err.to_string()),
    }
}

fn connection_error(err: ConnectionError) -> OutOfBandError {
    match err {
        ConnectionError::InvitationAlreadyUsed(msg) => OutOfBandError::InvitationAlreadyUsed(msg),
        _ => OutOfBandError::ConnectionError(err.to_string()),
    }
}

/// `OutOfBandUsecase` creates, receives and accepts out-of-band invitations
#[derive(Clone)]
pub struct OutOfBandUsecase<TWallet>
where
    TWallet: Wallet,
{
    store: Store,
    events: EventEmitter,
    sender: MessageSender<TWallet>,
    routing: RoutingService<TWallet>,
    connections: ConnectionUsecase<TWallet>,
    config: HandshakeConfig,
}

impl<TWallet> OutOfBandUsecase<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(
        store: Store,
        events: EventEmitter,
        sender: MessageSender<TWallet>,
        routing: RoutingService<TWallet>,
        connections: ConnectionUsecase<TWallet>,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            store,
            events,
            sender,
            routing,
            connections,
            config,
        }
    }

    async fn save_new(&self, record: &mut OutOfBandRecord) -> Result<(), OutOfBandError> {
        self.store.save(record).await.map_err(storage_error)?;
        self.events.emit(AgentEvent::OutOfBandStateChanged {
            out_of_band_id: record.id.clone(),
            previous: None,
            state: record.state,
        });

        Ok(())
    }

    async fn update_state(
        &self,
        record: &mut OutOfBandRecord,
        state: OobState,
    ) -> Result<(), OutOfBandError> {
        let previous = record.set_state(state)?;
        self.store.update(record).await.map_err(storage_error)?;

        debug!(
            "out of band {} moved from {} to {}",
            record.id, previous, record.state
        );

        self.events.emit(AgentEvent::OutOfBandStateChanged {
            out_of_band_id: record.id.clone(),
            previous: Some(previous),
            state: record.state,
        });

        Ok(())
    }

    /// `request_connection` starts the handshake and delivers the request, the connection is
    /// dropped again when the request cannot be delivered
    async fn request_connection(
        &self,
        record: &OutOfBandRecord,
        config: AcceptConfig,
    ) -> Result<ConnectionRecord, OutOfBandError> {
        let (connection, outbound) = self
            .connections
            .start_handshake(record, config)
            .await
            .map_err(connection_error)?;

        if let Err(err) = self.sender.send(outbound).await {
            if let Err(cleanup) = self.store.delete(&connection).await {
                warn!("connection {} not removed: {}", connection.id, cleanup);
            }

            return Err(OutOfBandError::ConnectionError(err.to_string()));
        }

        Ok(connection)
    }

    /// `reopen` gives a claimed invitation back after a failed accept
    async fn reopen(&self, record: &mut OutOfBandRecord) {
        let previous = match record.reopen() {
            Ok(previous) => previous,
            Err(err) => {
                warn!("invitation {} not reopened: {}", record.invitation_id(), err);
                return;
            }
        };

        if let Err(err) = self.store.update(record).await {
            warn!("invitation {} not reopened: {}", record.invitation_id(), err);
            return;
        }

        debug!("invitation {} reopened", record.invitation_id());
        self.events.emit(AgentEvent::OutOfBandStateChanged {
            out_of_band_id: record.id.clone(),
            previous: Some(previous),
            state: record.state,
        });
    }

    /// `create_invitation_url` creates a new invitation and encodes it as `<domain>?oob=...`
    pub async fn create_invitation_url(
        &self,
        config: CreateInvitationConfig,
        domain: &str,
    ) -> Result<(OutOfBandRecord, String), OutOfBandError> {
        let (record, invitation) = self.create_invitation(config).await?;
        let url = invitation.to_url(domain)?;
        Ok((record, url))
    }
}

#[async_trait]
impl<TWallet> OutOfBandAPI for OutOfBandUsecase<TWallet>
where
    TWallet: Wallet,
{
    async fn create_invitation(
        &self,
        config: CreateInvitationConfig,
    ) -> Result<(OutOfBandRecord, OutOfBandInvitation), OutOfBandError> {
        if config.handshake_protocols.is_empty() {
            return Err(OutOfBandError::InvalidInvitation(
                "at least one handshake protocol is required".to_string(),
            ));
        }

        let routing = self
            .routing
            .get_routing(config.mediator_id.as_deref(), true)
            .await
            .map_err(|err| OutOfBandError::RoutingError(err.to_string()))?;

        let services = routing
            .endpoints
            .iter()
            .enumerate()
            .map(|(idx, endpoint)| {
                InlineService::new(
                    &format!("#inline-{}", idx),
                    &routing.verkey,
                    &routing.routing_keys,
                    endpoint,
                )
            })
            .collect::<Result<Vec<InlineService>, _>>()
            .map_err(|err| OutOfBandError::InvalidInvitation(err.to_string()))?;

        let label = config.label.unwrap_or(self.config.label.clone());
        let mut invitation =
            OutOfBandInvitation::new(&label, &config.handshake_protocols, services);
        invitation.goal_code = config.goal_code;
        invitation.goal = config.goal;
        invitation.image_url = config.image_url.or(self.config.image_url.clone());

        let mut record = OutOfBandRecord::new(
            OobRole::Sender,
            OobState::AwaitResponse,
            invitation.clone(),
            config.multi_use,
            config
                .auto_accept_connection
                .unwrap_or(self.config.auto_accept_connections),
        );
        record.mediator_id = routing.mediator_id;

        self.save_new(&mut record).await?;
        info!(
            "invitation created: {} (multi use: {})",
            invitation.id(),
            record.reusable
        );

        Ok((record, invitation))
    }

    async fn receive_invitation(
        &self,
        invitation: OutOfBandInvitation,
    ) -> Result<OutOfBandRecord, OutOfBandError> {
        if invitation.supported_protocols().is_empty() {
            return Err(OutOfBandError::InvalidInvitation(format!(
                "invitation {} offers no supported handshake protocol",
                invitation.id()
            )));
        }

        if invitation.resolved_services().is_empty() {
            return Err(OutOfBandError::InvalidInvitation(format!(
                "invitation {} has no usable service",
                invitation.id()
            )));
        }

        let query = Query::new()
            .with_tag("invitation_id", &invitation.id())
            .with_tag("role", OobRole::Receiver.as_str());

        let existing = self
            .store
            .find_by_query::<OutOfBandRecord>(&query)
            .await
            .map_err(storage_error)?;

        if !existing.is_empty() {
            return Err(OutOfBandError::DuplicateInvitation(invitation.id()));
        }

        let mut record = OutOfBandRecord::new(
            OobRole::Receiver,
            OobState::PrepareResponse,
            invitation,
            false,
            self.config.auto_accept_connections,
        );

        self.save_new(&mut record).await?;
        info!("invitation received: {}", record.invitation_id());
        Ok(record)
    }

    async fn receive_invitation_from_url(
        &self,
        url: &str,
    ) -> Result<OutOfBandRecord, OutOfBandError> {
        let invitation = OutOfBandInvitation::from_url(url)?;
        self.receive_invitation(invitation).await
    }

    async fn accept_invitation(
        &self,
        out_of_band_id: &str,
        config: AcceptConfig,
    ) -> Result<ConnectionRecord, OutOfBandError> {
        let mut record = self.get_by_id(out_of_band_id).await?;
        record.assert_role(OobRole::Receiver)?;

        let claimed = match record.state {
            // one accept wins the version check on the invitation, a single use loser stops here
            OobState::PrepareResponse => {
                match self.update_state(&mut record, OobState::Connected).await {
                    Ok(()) => true,
                    Err(OutOfBandError::InvalidState(_)) if record.reusable => false,
                    Err(OutOfBandError::InvalidState(_)) => {
                        return Err(OutOfBandError::InvitationAlreadyUsed(
                            record.invitation_id(),
                        ))
                    }
                    Err(err) => return Err(err),
                }
            }
            _ if record.reusable => false,
            _ => {
                return Err(OutOfBandError::InvitationAlreadyUsed(
                    record.invitation_id(),
                ))
            }
        };

        match self.request_connection(&record, config).await {
            Ok(connection) => {
                info!(
                    "invitation {} accepted, connection: {}",
                    record.invitation_id(),
                    connection.id
                );
                Ok(connection)
            }
            Err(err) => {
                if claimed {
                    self.reopen(&mut record).await;
                }

                Err(err)
            }
        }
    }

    async fn find_by_invitation_id(
        &self,
        invitation_id: &str,
    ) -> Result<Option<OutOfBandRecord>, OutOfBandError> {
        let query = Query::new().with_tag("invitation_id", invitation_id);
        let records = self
            .store
            .find_by_query::<OutOfBandRecord>(&query)
            .await
            .map_err(storage_error)?;

        Ok(records.into_iter().next())
    }

    async fn get_by_id(&self, out_of_band_id: &str) -> Result<OutOfBandRecord, OutOfBandError> {
        self.store
            .get_by_id::<OutOfBandRecord>(out_of_band_id)
            .await
            .map_err(storage_error)
    }

    async fn find_all(&self) -> Result<Vec<OutOfBandRecord>, OutOfBandError> {
        self.store
            .get_all::<OutOfBandRecord>()
            .await
            .map_err(storage_error)
    }

    async fn delete_by_id(&self, out_of_band_id: &str) -> Result<(), OutOfBandError> {
        let record = self.get_by_id(out_of_band_id).await?;
        self.store.delete(&record).await.map_err(storage_error)
    }
}
