use std::time::Duration;

use rst_common::standard::async_trait::async_trait;
use rst_common::standard::serde_json;
use rst_common::with_logging::log::{debug, info, warn};

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::events::{wait_for, AgentEvent, EventEmitter};
use crate::didcomm::message::{AgentMessage, Attachment, MessageHeader};
use crate::didcomm::sender::MessageSender;
use crate::identity::did::did_from_verkey;
use crate::identity::did::types::DidDoc;
use crate::identity::oob::types::{OobRole, OobState};
use crate::identity::oob::OutOfBandRecord;
use crate::routing::{Routing, RoutingService};
use crate::storage::types::{Query, StorageError};
use crate::storage::Store;
use crate::wallet::crypto;
use crate::wallet::types::Wallet;

use super::connection::ConnectionRecord;
use super::messages::{
    ConnectionProblemReport, ConnectionRequest, ConnectionResponse, DidExchangeComplete,
    DidExchangeProblemReport, DidExchangeRequest, DidExchangeResponse, LegacyConnection,
    ProblemDescription, TrustPing, TrustPingResponse,
};
use super::signature::{sign_attachment, verify_attachment, SignatureDecorator};
use super::types::{
    AcceptConfig, ConnectionAPI, ConnectionError, ConnectionRole, ConnectionState,
    HandshakeConfig, HandshakeProtocol, DEFAULT_CONNECTED_TIMEOUT,
};

const PROBLEM_ABANDONED: &str = "abandoned";

fn storage_error(err: StorageError) -> ConnectionError {
    match err {
        StorageError::RecordNotFound(msg) => ConnectionError::RecordNotFound(msg),
        StorageError::VersionConflict(msg) => ConnectionError::InvalidState(msg),
        _ => ConnectionError::StorageError(err.to_string()),
    }
}

fn message_error<E: ToString>(err: E) -> ConnectionError {
    ConnectionError::MessageError(err.to_string())
}

fn violation<E: ToString>(err: E) -> ConnectionError {
    ConnectionError::ProtocolViolation(err.to_string())
}

/// `ConnectionUsecase` is the connection handshake engine for both protocol variants
#[derive(Clone)]
pub struct ConnectionUsecase<TWallet>
where
    TWallet: Wallet,
{
    wallet: TWallet,
    store: Store,
    events: EventEmitter,
    sender: MessageSender<TWallet>,
    routing: RoutingService<TWallet>,
    config: HandshakeConfig,
}

impl<TWallet> ConnectionUsecase<TWallet>
where
    TWallet: Wallet,
{
    pub fn new(
        wallet: TWallet,
        store: Store,
        events: EventEmitter,
        sender: MessageSender<TWallet>,
        routing: RoutingService<TWallet>,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            wallet,
            store,
            events,
            sender,
            routing,
            config,
        }
    }

    async fn update_state(
        &self,
        record: &mut ConnectionRecord,
        state: ConnectionState,
    ) -> Result<(), ConnectionError> {
        let previous = record.set_state(state)?;
        self.store.update(record).await.map_err(storage_error)?;

        debug!(
            "connection {} moved from {} to {}",
            record.id, previous, record.state
        );

        self.events.emit(AgentEvent::ConnectionStateChanged {
            connection_id: record.id.clone(),
            previous: Some(previous),
            state: record.state,
        });

        Ok(())
    }

    async fn update_out_of_band(
        &self,
        out_of_band: &mut OutOfBandRecord,
        state: OobState,
    ) -> Result<(), ConnectionError> {
        let previous = out_of_band
            .set_state(state)
            .map_err(|err| ConnectionError::InvalidState(err.to_string()))?;

        self.store
            .update(out_of_band)
            .await
            .map_err(storage_error)?;

        self.events.emit(AgentEvent::OutOfBandStateChanged {
            out_of_band_id: out_of_band.id.clone(),
            previous: Some(previous),
            state: out_of_band.state,
        });

        Ok(())
    }

    /// `complete_out_of_band` closes the receiver invitation once its handshake is done
    async fn complete_out_of_band(&self, record: &ConnectionRecord) -> Result<(), ConnectionError> {
        let out_of_band_id = match record.out_of_band_id.as_ref() {
            Some(id) => id,
            None => return Ok(()),
        };

        let out_of_band = self
            .store
            .find_by_id::<OutOfBandRecord>(out_of_band_id)
            .await
            .map_err(storage_error)?;

        match out_of_band {
            Some(mut out_of_band)
                if out_of_band.role == OobRole::Receiver && out_of_band.state != OobState::Done =>
            {
                self.update_out_of_band(&mut out_of_band, OobState::Done).await
            }
            _ => Ok(()),
        }
    }

    async fn find_by_thread(
        &self,
        thread_id: &str,
        role: ConnectionRole,
    ) -> Result<Option<ConnectionRecord>, ConnectionError> {
        let query = Query::new()
            .with_tag("thread_id", thread_id)
            .with_tag("role", role.as_str());

        self.store
            .find_single_by_query::<ConnectionRecord>(&query)
            .await
            .map_err(storage_error)
    }

    async fn new_routing(&self, mediator_id: Option<&str>) -> Result<Routing, ConnectionError> {
        self.routing
            .get_routing(mediator_id, true)
            .await
            .map_err(|err| ConnectionError::RoutingError(err.to_string()))
    }

    fn did_doc_for(&self, routing: &Routing) -> Result<(String, DidDoc), ConnectionError> {
        let did = did_from_verkey(&routing.verkey).map_err(message_error)?;
        let doc = DidDoc::new(
            &did,
            &routing.verkey,
            &routing.endpoints,
            &routing.routing_keys,
        );

        Ok((did, doc))
    }

    fn doc_attachment(doc: &DidDoc) -> Result<Attachment, ConnectionError> {
        let json = serde_json::to_vec(doc).map_err(message_error)?;
        Ok(Attachment::from_base64(crypto::b64_encode(&json)))
    }

    fn doc_from_bytes(bytes: &[u8]) -> Result<DidDoc, ConnectionError> {
        let doc: DidDoc = serde_json::from_slice(bytes).map_err(violation)?;
        doc.validate().map_err(violation)?;
        Ok(doc)
    }

    /// `find_invitation` resolves the sender invitation a request answers, through the parent
    /// thread id first and the key the request was encrypted for otherwise
    async fn find_invitation(
        &self,
        parent_thread_id: Option<&str>,
        recipient_key: Option<&str>,
    ) -> Result<OutOfBandRecord, ConnectionError> {
        if let Some(invitation_id) = parent_thread_id {
            let query = Query::new()
                .with_tag("invitation_id", invitation_id)
                .with_tag("role", OobRole::Sender.as_str());

            let found = self
                .store
                .find_single_by_query::<OutOfBandRecord>(&query)
                .await
                .map_err(storage_error)?;

            if let Some(out_of_band) = found {
                return Ok(out_of_band);
            }
        }

        if let Some(key) = recipient_key {
            let query = Query::new()
                .with_tag("invitation_key", key)
                .with_tag("role", OobRole::Sender.as_str());

            let found = self
                .store
                .find_single_by_query::<OutOfBandRecord>(&query)
                .await
                .map_err(storage_error)?;

            if let Some(out_of_band) = found {
                return Ok(out_of_band);
            }
        }

        Err(ConnectionError::ProtocolViolation(
            "request does not answer any invitation".to_string(),
        ))
    }

    /// `process_request` runs on the responder: it creates the connection record for the
    /// request and answers it right away when the invitation auto accepts connections
    pub async fn process_request(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<(ConnectionRecord, Option<OutboundMessageContext>), ConnectionError> {
        let (protocol, their_did, their_doc, their_label) =
            if DidExchangeRequest::accepts(&ctx.message_type) {
                let request = ctx.message_as::<DidExchangeRequest>().map_err(violation)?;
                let attachment = request.did_doc_attach.ok_or(violation(
                    "request: did_doc~attach was missing",
                ))?;

                let encoded = attachment
                    .data
                    .base64
                    .ok_or(violation("request: did_doc~attach has no base64 data"))?;

                let bytes = crypto::b64_decode(&encoded).map_err(violation)?;
                (
                    HandshakeProtocol::DidExchange,
                    request.did,
                    Self::doc_from_bytes(&bytes)?,
                    request.label,
                )
            } else {
                let request = ctx.message_as::<ConnectionRequest>().map_err(violation)?;
                request.connection.did_doc.validate().map_err(violation)?;
                (
                    HandshakeProtocol::Connections,
                    request.connection.did,
                    request.connection.did_doc,
                    request.label,
                )
            };

        let parent_thread_id = ctx.header.parent_thread_id();
        let mut out_of_band = self
            .find_invitation(parent_thread_id.as_deref(), ctx.recipient_key.as_deref())
            .await?;

        let thread_id = ctx.header.thread_id();
        if let Some(existing) = self
            .find_by_thread(&thread_id, ConnectionRole::Responder)
            .await?
        {
            warn!(
                "duplicate request on thread {}, connection {} is {}",
                thread_id, existing.id, existing.state
            );

            return Err(ConnectionError::ProtocolViolation(format!(
                "request already processed for connection {}",
                existing.id
            )));
        }

        if !out_of_band.reusable && out_of_band.state == OobState::Done {
            return Err(ConnectionError::InvitationAlreadyUsed(
                out_of_band.invitation_id(),
            ));
        }

        let routing = self.new_routing(out_of_band.mediator_id.as_deref()).await?;
        let (did, did_doc) = self.did_doc_for(&routing)?;

        let mut record = ConnectionRecord::new(
            ConnectionRole::Responder,
            protocol,
            ConnectionState::Invited,
            did,
            did_doc,
            thread_id,
        )
        .with_thread_scoped_id();

        record.their_did = Some(their_did);
        record.their_doc = Some(their_doc);
        record.their_label = Some(their_label);
        record.out_of_band_id = Some(out_of_band.id.clone());
        record.invitation_key = out_of_band.invitation.invitation_key();
        record.parent_thread_id = parent_thread_id.or(Some(out_of_band.invitation_id()));
        record.multi_use_invitation = out_of_band.reusable;
        record.auto_accept_connection = out_of_band.auto_accept_connection;

        // the id is derived from the thread, a concurrent request on it fails the insert
        self.store
            .save(&mut record)
            .await
            .map_err(|err| match err {
                StorageError::RecordDuplicate(id) => ConnectionError::InvalidState(format!(
                    "request already in progress for connection {}",
                    id
                )),
                other => storage_error(other),
            })?;

        if !out_of_band.reusable {
            let invitation_id = out_of_band.invitation_id();
            if let Err(err) = self
                .update_out_of_band(&mut out_of_band, OobState::Done)
                .await
            {
                if let Err(cleanup) = self.store.delete(&record).await {
                    warn!("connection {} not removed: {}", record.id, cleanup);
                }

                return Err(match err {
                    ConnectionError::InvalidState(_) => {
                        ConnectionError::InvitationAlreadyUsed(invitation_id)
                    }
                    other => other,
                });
            }
        }

        self.events.emit(AgentEvent::ConnectionStateChanged {
            connection_id: record.id.clone(),
            previous: None,
            state: record.state,
        });

        self.update_state(&mut record, ConnectionState::Requested)
            .await?;

        info!(
            "connection request received on invitation {}: {}",
            out_of_band.invitation_id(),
            record.id
        );

        if !record.auto_accept_connection {
            return Ok((record, None));
        }

        let (record, outbound) = self.create_response(record).await?;
        Ok((record, Some(outbound)))
    }

    /// `create_response` signs our document with the invitation key and moves the responder to
    /// `Responded`
    pub async fn create_response(
        &self,
        mut record: ConnectionRecord,
    ) -> Result<(ConnectionRecord, OutboundMessageContext), ConnectionError> {
        record.assert_role(ConnectionRole::Responder)?;
        record.assert_state(&[ConnectionState::Requested])?;

        let invitation_key = record
            .invitation_key
            .clone()
            .ok_or(ConnectionError::InvalidState(format!(
                "connection {} has no invitation key",
                record.id
            )))?;

        let header = MessageHeader::new("")
            .with_thread(Some(record.thread_id.clone()), record.parent_thread_id.clone());

        let message = match record.protocol {
            HandshakeProtocol::DidExchange => {
                let attachment = Self::doc_attachment(&record.did_doc)?;
                let signed = sign_attachment(&self.wallet, attachment, &invitation_key)
                    .await
                    .map_err(|err| ConnectionError::CryptoError(err.to_string()))?;

                DidExchangeResponse {
                    header: MessageHeader {
                        type_uri: DidExchangeResponse::TYPE.to_string(),
                        ..header
                    },
                    did: record.did.clone(),
                    did_doc_attach: Some(signed),
                }
                .to_value()
            }
            HandshakeProtocol::Connections => {
                let connection = serde_json::to_value(LegacyConnection {
                    did: record.did.clone(),
                    did_doc: record.did_doc.clone(),
                })
                .map_err(message_error)?;

                let connection_sig =
                    SignatureDecorator::sign(&self.wallet, &connection, &invitation_key)
                        .await
                        .map_err(|err| ConnectionError::CryptoError(err.to_string()))?;

                ConnectionResponse {
                    header: MessageHeader {
                        type_uri: ConnectionResponse::TYPE.to_string(),
                        ..header
                    },
                    connection_sig,
                }
                .to_value()
            }
        }
        .map_err(message_error)?;

        self.update_state(&mut record, ConnectionState::Responded)
            .await?;

        let outbound = OutboundMessageContext {
            message,
            connection: Some(record.clone()),
            service_override: None,
            sender_key: None,
            associated_record_id: Some(record.id.clone()),
            session: None,
        };

        Ok((record, outbound))
    }

    /// `process_response` runs on the requester: the responder document is only trusted when
    /// it is signed by the key the invitation was addressed to
    pub async fn process_response(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<(ConnectionRecord, Option<OutboundMessageContext>), ConnectionError> {
        let thread_id = ctx.header.thread_id();
        let mut record = self
            .find_by_thread(&thread_id, ConnectionRole::Requester)
            .await?
            .ok_or(ConnectionError::ProtocolViolation(format!(
                "no requester connection for thread {}",
                thread_id
            )))?;

        if record.state != ConnectionState::Requested {
            warn!(
                "unexpected response for connection {} in state {}",
                record.id, record.state
            );

            return Err(ConnectionError::ProtocolViolation(format!(
                "connection {} is {}, response not expected",
                record.id, record.state
            )));
        }

        let invitation_key = record
            .invitation_key
            .clone()
            .ok_or(ConnectionError::InvalidState(format!(
                "connection {} has no invitation key",
                record.id
            )))?;

        let (their_did, their_doc) = match record.protocol {
            HandshakeProtocol::DidExchange => {
                let response = ctx.message_as::<DidExchangeResponse>().map_err(violation)?;
                let attachment = response
                    .did_doc_attach
                    .ok_or(violation("response: did_doc~attach was missing"))?;

                let (signer, payload) = verify_attachment(&attachment)
                    .map_err(|err| ConnectionError::CryptoError(err.to_string()))?;

                if signer != invitation_key {
                    return Err(ConnectionError::ProtocolViolation(format!(
                        "response signed by {}, expected {}",
                        signer, invitation_key
                    )));
                }

                (response.did, Self::doc_from_bytes(&payload)?)
            }
            HandshakeProtocol::Connections => {
                let response = ctx.message_as::<ConnectionResponse>().map_err(violation)?;
                if response.connection_sig.signer != invitation_key {
                    return Err(ConnectionError::ProtocolViolation(format!(
                        "response signed by {}, expected {}",
                        response.connection_sig.signer, invitation_key
                    )));
                }

                let signed = response
                    .connection_sig
                    .verify()
                    .map_err(|err| ConnectionError::CryptoError(err.to_string()))?;

                let connection: LegacyConnection =
                    serde_json::from_value(signed).map_err(violation)?;
                connection.did_doc.validate().map_err(violation)?;
                (connection.did, connection.did_doc)
            }
        };

        record.their_did = Some(their_did);
        record.their_doc = Some(their_doc);
        self.update_state(&mut record, ConnectionState::Responded)
            .await?;

        if !record.auto_accept_connection {
            return Ok((record, None));
        }

        let (record, outbound) = self.create_completion(record).await?;
        Ok((record, Some(outbound)))
    }

    /// `create_completion` acknowledges the response: a `complete` message for `DidExchange`
    /// and a trust ping for legacy connections
    pub async fn create_completion(
        &self,
        mut record: ConnectionRecord,
    ) -> Result<(ConnectionRecord, OutboundMessageContext), ConnectionError> {
        record.assert_role(ConnectionRole::Requester)?;
        record.assert_state(&[ConnectionState::Responded])?;

        let message = match record.protocol {
            HandshakeProtocol::DidExchange => DidExchangeComplete {
                header: MessageHeader::new(DidExchangeComplete::TYPE).with_thread(
                    Some(record.thread_id.clone()),
                    record.parent_thread_id.clone(),
                ),
            }
            .to_value(),
            HandshakeProtocol::Connections => TrustPing::new(true).to_value(),
        }
        .map_err(message_error)?;

        self.update_state(&mut record, ConnectionState::Complete)
            .await?;
        self.complete_out_of_band(&record).await?;

        info!("connection completed: {}", record.id);
        let outbound = OutboundMessageContext {
            message,
            connection: Some(record.clone()),
            service_override: None,
            sender_key: None,
            associated_record_id: Some(record.id.clone()),
            session: None,
        };

        Ok((record, outbound))
    }

    pub async fn process_complete(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<ConnectionRecord, ConnectionError> {
        let complete = ctx.message_as::<DidExchangeComplete>().map_err(violation)?;
        let mut record = self
            .find_by_thread(&complete.thread_id(), ConnectionRole::Responder)
            .await?
            .ok_or(ConnectionError::ProtocolViolation(format!(
                "no responder connection for thread {}",
                complete.thread_id()
            )))?;

        if record.state != ConnectionState::Responded {
            warn!(
                "unexpected complete for connection {} in state {}",
                record.id, record.state
            );

            return Err(ConnectionError::ProtocolViolation(format!(
                "connection {} is {}, complete not expected",
                record.id, record.state
            )));
        }

        self.update_state(&mut record, ConnectionState::Complete)
            .await?;

        info!("connection completed: {}", record.id);
        Ok(record)
    }

    /// `process_problem_report` abandons the handshake the report refers to
    pub async fn process_problem_report(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<ConnectionRecord, ConnectionError> {
        let description = if DidExchangeProblemReport::accepts(&ctx.message_type) {
            ctx.message_as::<DidExchangeProblemReport>()
                .map_err(violation)?
                .description
        } else {
            ctx.message_as::<ConnectionProblemReport>()
                .map_err(violation)?
                .description
        };

        let thread_id = ctx.header.thread_id();
        let query = Query::new().with_tag("thread_id", &thread_id);
        let mut record = match ctx.connection.clone() {
            Some(connection) => connection,
            None => self
                .store
                .find_single_by_query::<ConnectionRecord>(&query)
                .await
                .map_err(storage_error)?
                .ok_or(ConnectionError::ProtocolViolation(format!(
                    "no connection for thread {}",
                    thread_id
                )))?,
        };

        if !record.state.can_move_to(ConnectionState::Abandoned) {
            warn!(
                "problem report ignored, connection {} is {}",
                record.id, record.state
            );

            return Err(ConnectionError::ProtocolViolation(format!(
                "connection {} is {}",
                record.id, record.state
            )));
        }

        record.error_message = Some(match description.en {
            Some(en) => format!("{}: {}", description.code, en),
            None => description.code,
        });

        self.update_state(&mut record, ConnectionState::Abandoned)
            .await?;

        warn!(
            "connection {} abandoned by peer: {:?}",
            record.id, record.error_message
        );
        Ok(record)
    }

    /// `create_ping` is only legal once the handshake gave us the peer document, a requester
    /// sending it from `Responded` completes its side
    pub async fn create_ping(
        &self,
        connection_id: &str,
        response_requested: bool,
    ) -> Result<(ConnectionRecord, OutboundMessageContext), ConnectionError> {
        let mut record = self.get_record(connection_id).await?;
        record.assert_state(&[ConnectionState::Responded, ConnectionState::Complete])?;

        if record.role == ConnectionRole::Requester && record.state == ConnectionState::Responded {
            self.update_state(&mut record, ConnectionState::Complete)
                .await?;
            self.complete_out_of_band(&record).await?;
        }

        let ping = TrustPing::new(response_requested);
        let outbound = OutboundMessageContext::new(&ping, Some(record.clone()))
            .map_err(message_error)?
            .with_associated_record(&record.id);

        Ok((record, outbound))
    }

    pub async fn process_ping(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, ConnectionError> {
        let connection = ctx
            .assert_ready_connection()
            .map_err(|err| ConnectionError::InvalidState(err.to_string()))?;

        let ping = ctx.message_as::<TrustPing>().map_err(violation)?;
        self.events.emit(AgentEvent::TrustPingReceived {
            connection_id: connection.id.clone(),
            thread_id: ping.thread_id(),
        });

        if !ping.response_requested {
            return Ok(None);
        }

        OutboundMessageContext::new(&TrustPingResponse::reply_to(&ping), Some(connection.clone()))
            .map(Some)
            .map_err(message_error)
    }

    pub async fn process_ping_response(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<(), ConnectionError> {
        let connection = ctx
            .assert_ready_connection()
            .map_err(|err| ConnectionError::InvalidState(err.to_string()))?;

        let response = ctx.message_as::<TrustPingResponse>().map_err(violation)?;
        self.events.emit(AgentEvent::TrustPingResponseReceived {
            connection_id: connection.id.clone(),
            thread_id: response.thread_id(),
        });

        Ok(())
    }

    /// `complete_on_message` lets any message other than a handshake message complete a
    /// responder still waiting in `Responded`, peers commonly skip the `complete` message
    pub async fn complete_on_message(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<ConnectionRecord>, ConnectionError> {
        let connection = match ctx.connection.as_ref() {
            Some(connection) => connection,
            None => return Ok(None),
        };

        let handshake = ctx.message_type.is_protocol("didexchange")
            || ctx.message_type.is_protocol("connections");

        if handshake
            || connection.role != ConnectionRole::Responder
            || connection.state != ConnectionState::Responded
        {
            return Ok(None);
        }

        let mut record = connection.clone();
        self.update_state(&mut record, ConnectionState::Complete)
            .await?;

        info!(
            "connection {} completed by {} message",
            record.id, ctx.message_type
        );
        Ok(Some(record))
    }

    async fn get_record(&self, connection_id: &str) -> Result<ConnectionRecord, ConnectionError> {
        self.store
            .get_by_id::<ConnectionRecord>(connection_id)
            .await
            .map_err(storage_error)
    }

    fn problem_report(
        record: &ConnectionRecord,
        reason: &str,
    ) -> Result<OutboundMessageContext, ConnectionError> {
        let header = MessageHeader::new("")
            .with_thread(Some(record.thread_id.clone()), record.parent_thread_id.clone());

        let description = ProblemDescription {
            code: PROBLEM_ABANDONED.to_string(),
            en: Some(reason.to_string()),
        };

        let message = match record.protocol {
            HandshakeProtocol::DidExchange => DidExchangeProblemReport {
                header: MessageHeader {
                    type_uri: DidExchangeProblemReport::TYPE.to_string(),
                    ..header
                },
                description,
            }
            .to_value(),
            HandshakeProtocol::Connections => ConnectionProblemReport {
                header: MessageHeader {
                    type_uri: ConnectionProblemReport::TYPE.to_string(),
                    ..header
                },
                description,
            }
            .to_value(),
        }
        .map_err(message_error)?;

        Ok(OutboundMessageContext {
            message,
            connection: Some(record.clone()),
            service_override: None,
            sender_key: None,
            associated_record_id: Some(record.id.clone()),
            session: None,
        })
    }
}

#[async_trait]
impl<TWallet> ConnectionAPI for ConnectionUsecase<TWallet>
where
    TWallet: Wallet,
{
    async fn start_handshake(
        &self,
        out_of_band: &OutOfBandRecord,
        config: AcceptConfig,
    ) -> Result<(ConnectionRecord, OutboundMessageContext), ConnectionError> {
        out_of_band
            .assert_role(OobRole::Receiver)
            .map_err(|err| ConnectionError::InvalidState(err.to_string()))?;

        let invitation = &out_of_band.invitation;
        let supported = invitation.supported_protocols();
        let protocol = match config.protocol {
            Some(protocol) if supported.contains(&protocol) => protocol,
            Some(protocol) => {
                return Err(ConnectionError::ProtocolViolation(format!(
                    "{} not offered by invitation {}",
                    protocol.uri(),
                    invitation.id()
                )))
            }
            None => supported
                .first()
                .copied()
                .ok_or(ConnectionError::ProtocolViolation(format!(
                    "invitation {} offers no supported handshake protocol",
                    invitation.id()
                )))?,
        };

        let service = invitation
            .resolved_services()
            .into_iter()
            .next()
            .ok_or(ConnectionError::ProtocolViolation(format!(
                "invitation {} has no usable service",
                invitation.id()
            )))?;

        let routing = self.new_routing(out_of_band.mediator_id.as_deref()).await?;
        let (did, did_doc) = self.did_doc_for(&routing)?;
        let label = config.label.unwrap_or(self.config.label.clone());
        let header =
            MessageHeader::new("").with_thread(None, Some(invitation.id()));

        let message = match protocol {
            HandshakeProtocol::DidExchange => DidExchangeRequest {
                header: MessageHeader {
                    type_uri: DidExchangeRequest::TYPE.to_string(),
                    ..header
                },
                label,
                goal_code: None,
                goal: None,
                did: did.clone(),
                did_doc_attach: Some(Self::doc_attachment(&did_doc)?),
            }
            .to_value(),
            HandshakeProtocol::Connections => ConnectionRequest {
                header: MessageHeader {
                    type_uri: ConnectionRequest::TYPE.to_string(),
                    ..header
                },
                label,
                image_url: self.config.image_url.clone(),
                connection: LegacyConnection {
                    did: did.clone(),
                    did_doc: did_doc.clone(),
                },
            }
            .to_value(),
        }
        .map_err(message_error)?;

        let thread_id = MessageHeader::from_value(&message)
            .map_err(message_error)?
            .thread_id();

        let mut record = ConnectionRecord::new(
            ConnectionRole::Requester,
            protocol,
            ConnectionState::Start,
            did,
            did_doc,
            thread_id,
        );

        record.their_label = Some(invitation.label.clone());
        record.out_of_band_id = Some(out_of_band.id.clone());
        record.invitation_key = service.recipient_keys.first().cloned();
        record.parent_thread_id = Some(invitation.id());
        record.multi_use_invitation = out_of_band.reusable;
        record.auto_accept_connection = config
            .auto_accept_connection
            .unwrap_or(self.config.auto_accept_connections);

        let previous = record.set_state(ConnectionState::Requested)?;
        self.store.save(&mut record).await.map_err(storage_error)?;
        self.events.emit(AgentEvent::ConnectionStateChanged {
            connection_id: record.id.clone(),
            previous: Some(previous),
            state: record.state,
        });

        info!(
            "connection request created for invitation {}: {}",
            invitation.id(),
            record.id
        );

        let outbound = OutboundMessageContext {
            message,
            connection: Some(record.clone()),
            service_override: None,
            sender_key: None,
            associated_record_id: None,
            session: None,
        }
        .with_service(service, Some(routing.verkey))
        .with_associated_record(&record.id);

        Ok((record, outbound))
    }

    async fn accept_request(
        &self,
        connection_id: &str,
    ) -> Result<ConnectionRecord, ConnectionError> {
        let record = self.get_record(connection_id).await?;
        let (record, outbound) = self.create_response(record).await?;

        self.sender
            .send(outbound)
            .await
            .map_err(|err| ConnectionError::SendError(err.to_string()))?;

        Ok(record)
    }

    async fn accept_response(
        &self,
        connection_id: &str,
    ) -> Result<ConnectionRecord, ConnectionError> {
        let record = self.get_record(connection_id).await?;
        let (record, outbound) = self.create_completion(record).await?;

        self.sender
            .send(outbound)
            .await
            .map_err(|err| ConnectionError::SendError(err.to_string()))?;

        Ok(record)
    }

    async fn abandon(
        &self,
        connection_id: &str,
        reason: &str,
    ) -> Result<ConnectionRecord, ConnectionError> {
        let mut record = self.get_record(connection_id).await?;
        record.error_message = Some(reason.to_string());
        self.update_state(&mut record, ConnectionState::Abandoned)
            .await?;

        if record.their_doc.is_some() {
            let outbound = Self::problem_report(&record, reason)?;
            if let Err(err) = self.sender.send(outbound).await {
                warn!("problem report not delivered for {}: {}", record.id, err);
            }
        }

        Ok(record)
    }

    async fn send_ping(
        &self,
        connection_id: &str,
        response_requested: bool,
    ) -> Result<ConnectionRecord, ConnectionError> {
        let (record, outbound) = self.create_ping(connection_id, response_requested).await?;

        self.sender
            .send(outbound)
            .await
            .map_err(|err| ConnectionError::SendError(err.to_string()))?;

        Ok(record)
    }

    async fn get_by_id(&self, connection_id: &str) -> Result<ConnectionRecord, ConnectionError> {
        self.get_record(connection_id).await
    }

    async fn find_by_query(&self, query: &Query) -> Result<Vec<ConnectionRecord>, ConnectionError> {
        self.store
            .find_by_query::<ConnectionRecord>(query)
            .await
            .map_err(storage_error)
    }

    async fn find_all(&self) -> Result<Vec<ConnectionRecord>, ConnectionError> {
        self.store
            .get_all::<ConnectionRecord>()
            .await
            .map_err(storage_error)
    }

    async fn delete_by_id(&self, connection_id: &str) -> Result<(), ConnectionError> {
        let record = self.get_record(connection_id).await?;
        self.store.delete(&record).await.map_err(storage_error)
    }

    async fn set_tag(
        &self,
        connection_id: &str,
        name: &str,
        value: &str,
    ) -> Result<ConnectionRecord, ConnectionError> {
        let mut record = self.get_record(connection_id).await?;
        record.set_tag(name, value);
        self.store.update(&mut record).await.map_err(storage_error)?;
        Ok(record)
    }

    async fn return_when_is_connected(
        &self,
        connection_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ConnectionRecord, ConnectionError> {
        let mut receiver = self.events.subscribe();

        let check = |record: ConnectionRecord| match record.state {
            ConnectionState::Complete => Ok(Some(record)),
            ConnectionState::Abandoned => Err(ConnectionError::InvalidState(format!(
                "connection {} was abandoned: {:?}",
                record.id, record.error_message
            ))),
            _ => Ok(None),
        };

        if let Some(record) = check(self.get_record(connection_id).await?)? {
            return Ok(record);
        }

        let expected_id = connection_id.to_string();
        wait_for(
            &mut receiver,
            timeout.unwrap_or(DEFAULT_CONNECTED_TIMEOUT),
            |event| match event {
                AgentEvent::ConnectionStateChanged {
                    connection_id,
                    state,
                    ..
                } => connection_id == &expected_id && state.is_terminal(),
                _ => false,
            },
        )
        .await
        .map_err(|err| ConnectionError::Timeout(err.to_string()))?;

        check(self.get_record(connection_id).await?)?.ok_or(ConnectionError::InvalidState(
            format!("connection {} is not complete", connection_id),
        ))
    }
}
