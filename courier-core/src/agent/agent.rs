use std::sync::Arc;

use rst_common::standard::async_trait::async_trait;
use rst_common::standard::serde_json::{self, Value};
use rst_common::with_logging::log::{debug, error, info, warn};
use rst_common::with_tokio::tokio::sync::{mpsc, watch, Mutex};
use rst_common::with_tokio::tokio::task::JoinHandle;
use rst_common::with_tokio::tokio::{self, select};

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::dispatcher::types::{DispatcherError, MessageHandler};
use crate::didcomm::dispatcher::Dispatcher;
use crate::didcomm::envelope::types::{Envelope, UnpackedMessage};
use crate::didcomm::envelope::EnvelopePacker;
use crate::didcomm::events::{AgentEvent, EventEmitter};
use crate::didcomm::sender::MessageSender;
use crate::didcomm::transport::types::{InboundHandler, TransportError};
use crate::didcomm::transport::{InboundFrame, SessionHandle, SessionRegistry, TransportRegistry};
use crate::identity::connection::{
    ConnectionRecord, ConnectionUsecase, ConnectionsHandler, DidExchangeHandler, TrustPingHandler,
};
use crate::identity::oob::OutOfBandUsecase;
use crate::routing::mediation::{MediationRecipientHandler, MediationRecipientUsecase, MediationRecord};
use crate::routing::mediator::types::MessageQueue;
use crate::routing::mediator::{
    ForwardHandler, MediatorHandler, MediatorPickupHandler, MediatorUsecase,
};
use crate::routing::pickup::{PickupRecipientHandler, PickupUsecase};
use crate::routing::RoutingService;
use crate::storage::types::Query;
use crate::storage::Store;
use crate::wallet::types::Wallet;

use super::bootstrap;
use super::config::AgentConfig;
use super::types::AgentError;

type InboundReceiver = mpsc::UnboundedReceiver<InboundFrame>;

/// `Agent` wires every domain of a single agent instance together
///
/// Clones share the same state. Inbound frames queued by the transports (and by the pickup and
/// the sender for return routed replies) are processed by a worker spawned on [`Agent::start`].
#[derive(Clone)]
pub struct Agent<TWallet>
where
    TWallet: Wallet,
{
    config: AgentConfig,
    wallet: TWallet,
    store: Store,
    events: EventEmitter,
    packer: EnvelopePacker<TWallet>,
    dispatcher: Dispatcher,
    sender: MessageSender<TWallet>,
    connections: ConnectionUsecase<TWallet>,
    out_of_band: OutOfBandUsecase<TWallet>,
    mediation: MediationRecipientUsecase<TWallet>,
    mediator: MediatorUsecase<TWallet>,
    pickup: PickupUsecase<TWallet>,
    inbound: mpsc::UnboundedSender<InboundFrame>,
    pending: Arc<Mutex<Option<InboundReceiver>>>,
    shutdown: Arc<watch::Sender<bool>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<TWallet> Agent<TWallet>
where
    TWallet: Wallet + 'static,
{
    pub fn new(
        wallet: TWallet,
        store: Store,
        transports: TransportRegistry,
        queue: Arc<dyn MessageQueue>,
        config: AgentConfig,
    ) -> Result<Self, AgentError> {
        let events = EventEmitter::default();
        let (inbound, receiver) = mpsc::unbounded_channel();

        let sender = MessageSender::new(
            wallet.clone(),
            transports,
            SessionRegistry::new(),
            store.clone(),
            config.retry_policy(),
        )
        .with_inbound(inbound.clone())
        .with_queue(queue.clone());

        let mediation = MediationRecipientUsecase::new(store.clone(), events.clone(), sender.clone());
        let routing = RoutingService::new(wallet.clone(), config.endpoints.clone(), mediation.clone());

        let connections = ConnectionUsecase::new(
            wallet.clone(),
            store.clone(),
            events.clone(),
            sender.clone(),
            routing.clone(),
            config.handshake(),
        );

        let out_of_band = OutOfBandUsecase::new(
            store.clone(),
            events.clone(),
            sender.clone(),
            routing,
            connections.clone(),
            config.handshake(),
        );

        let mediator = MediatorUsecase::new(
            wallet.clone(),
            store.clone(),
            events.clone(),
            sender.clone(),
            queue,
            config.mediator(),
        );

        let pickup = PickupUsecase::new(
            store.clone(),
            events.clone(),
            sender.clone(),
            config.pickup.clone(),
            inbound.clone(),
        );

        let handlers: Vec<Arc<dyn MessageHandler>> = vec![
            Arc::new(DidExchangeHandler::new(connections.clone())),
            Arc::new(ConnectionsHandler::new(connections.clone())),
            Arc::new(TrustPingHandler::new(connections.clone())),
            Arc::new(MediationRecipientHandler::new(mediation.clone())),
            Arc::new(PickupRecipientHandler::new(pickup.clone())),
            Arc::new(MediatorHandler::new(mediator.clone())),
            Arc::new(ForwardHandler::new(mediator.clone())),
            Arc::new(MediatorPickupHandler::new(mediator.clone())),
        ];

        let dispatcher = Dispatcher::new();
        for handler in handlers {
            dispatcher
                .register_handler(handler)
                .map_err(|err| AgentError::DispatchError(err.to_string()))?;
        }

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            packer: EnvelopePacker::new(wallet.clone()),
            config,
            wallet,
            store,
            events,
            dispatcher,
            sender,
            connections,
            out_of_band,
            mediation,
            mediator,
            pickup,
            inbound,
            pending: Arc::new(Mutex::new(Some(receiver))),
            shutdown: Arc::new(shutdown),
            worker: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn wallet(&self) -> TWallet {
        self.wallet.clone()
    }

    pub fn store(&self) -> Store {
        self.store.clone()
    }

    pub fn events(&self) -> EventEmitter {
        self.events.clone()
    }

    pub fn sender(&self) -> MessageSender<TWallet> {
        self.sender.clone()
    }

    pub fn connections(&self) -> ConnectionUsecase<TWallet> {
        self.connections.clone()
    }

    pub fn out_of_band(&self) -> OutOfBandUsecase<TWallet> {
        self.out_of_band.clone()
    }

    pub fn mediation(&self) -> MediationRecipientUsecase<TWallet> {
        self.mediation.clone()
    }

    pub fn mediator(&self) -> MediatorUsecase<TWallet> {
        self.mediator.clone()
    }

    pub fn pickup(&self) -> PickupUsecase<TWallet> {
        self.pickup.clone()
    }

    /// `register_handler` adds an application protocol next to the built-in ones
    pub fn register_handler(&self, handler: Arc<dyn MessageHandler>) -> Result<(), AgentError> {
        self.dispatcher
            .register_handler(handler)
            .map_err(|err| AgentError::DispatchError(err.to_string()))
    }

    /// `enqueue` hands raw envelope bytes to the inbound worker, the transports which do not
    /// wait for the processing result use it
    pub fn enqueue(&self, payload: Vec<u8>, session: Option<SessionHandle>) -> Result<(), AgentError> {
        self.inbound
            .send(InboundFrame::new(payload, session))
            .map_err(|_| AgentError::ConfigError("inbound queue closed".to_string()))
    }

    /// `start` spawns the inbound worker then connects to the mediator when one is configured
    ///
    /// Returns the mediation used for pickup, if any. Starting an already started agent is a
    /// no-op.
    pub async fn start(&self) -> Result<Option<MediationRecord>, AgentError> {
        let receiver = self.pending.lock().await.take();
        let receiver = match receiver {
            Some(receiver) => receiver,
            None => {
                warn!("agent {} already started", self.config.label);
                return Ok(None);
            }
        };

        let worker = self.spawn_worker(receiver);
        *self.worker.lock().await = Some(worker);
        info!("agent {} started", self.config.label);

        bootstrap::initialize_mediator(self).await
    }

    pub async fn shutdown(&self) {
        self.pickup.stop().await;
        self.shutdown.send_replace(true);

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!("inbound worker ended abnormally: {}", err);
            }
        }

        info!("agent {} stopped", self.config.label);
    }

    /// `receive` processes a single inbound envelope
    ///
    /// The returned bytes are a reply the caller must write back on the channel the envelope
    /// came from, they are only produced when the envelope asked for a return route.
    pub async fn receive(
        &self,
        payload: Vec<u8>,
        session: Option<SessionHandle>,
    ) -> Result<Option<Vec<u8>>, AgentError> {
        let envelope =
            Envelope::try_from(payload).map_err(|err| AgentError::EnvelopeError(err.to_string()))?;

        let unpacked = self
            .packer
            .unpack(&envelope)
            .await
            .map_err(|err| AgentError::EnvelopeError(err.to_string()))?;

        let message: Value = serde_json::from_slice(&unpacked.plaintext)
            .map_err(|err| AgentError::MessageError(err.to_string()))?;

        let connection = self.find_connection(&unpacked).await?;
        let mut ctx = InboundMessageContext::new(
            message,
            unpacked.sender_key.clone(),
            Some(unpacked.recipient_key.clone()),
        )
        .map_err(|err| AgentError::MessageError(err.to_string()))?
        .with_connection(connection)
        .with_session(session);

        debug!(
            "received {} (connection: {:?})",
            ctx.message_type,
            ctx.connection.as_ref().map(|connection| connection.id.clone())
        );

        self.events.emit(AgentEvent::MessageReceived {
            connection_id: ctx.connection.as_ref().map(|connection| connection.id.clone()),
            message_type: ctx.message_type.to_string(),
            message: ctx.message.clone(),
        });

        match self.connections.complete_on_message(&ctx).await {
            Ok(Some(completed)) => ctx = ctx.with_connection(Some(completed)),
            Ok(None) => {}
            Err(err) => warn!("unable to complete connection on {}: {}", ctx.message_type, err),
        }

        let outbound = match self.dispatcher.dispatch(&ctx).await {
            Ok(outbound) => outbound,
            Err(DispatcherError::NoHandlersRegistered) => {
                error!("{} dropped, no message handlers registered", ctx.message_type);
                return Err(AgentError::ConfigError(
                    DispatcherError::NoHandlersRegistered.to_string(),
                ));
            }
            Err(err) => {
                warn!("{} rejected: {}", ctx.message_type, err);
                return Err(AgentError::DispatchError(err.to_string()));
            }
        };

        match outbound {
            Some(outbound) => self.deliver(&ctx, outbound).await,
            None => Ok(None),
        }
    }

    /// `find_connection` resolves the connection by the key the envelope was packed for, an
    /// authenticated sender must also match the peer key of that connection
    async fn find_connection(
        &self,
        unpacked: &UnpackedMessage,
    ) -> Result<Option<ConnectionRecord>, AgentError> {
        let query = Query::new().with_tag("verkey", &unpacked.recipient_key);
        let connection = self
            .store
            .find_single_by_query::<ConnectionRecord>(&query)
            .await
            .map_err(|err| AgentError::StorageError(err.to_string()))?;

        let (connection, sender_key) = match (connection, unpacked.sender_key.as_ref()) {
            (Some(connection), Some(sender_key)) => (connection, sender_key),
            (connection, _) => return Ok(connection),
        };

        match connection.their_verkey() {
            Some(their_key) if &their_key != sender_key => {
                warn!(
                    "sender {} does not match the peer of connection {}",
                    sender_key, connection.id
                );
                Ok(None)
            }
            _ => Ok(Some(connection)),
        }
    }

    async fn deliver(
        &self,
        inbound: &InboundMessageContext,
        outbound: OutboundMessageContext,
    ) -> Result<Option<Vec<u8>>, AgentError> {
        let return_to = inbound
            .sender_key
            .as_ref()
            .filter(|_| inbound.header.has_return_route());

        if let Some(recipient_key) = return_to {
            let sender_key = outbound
                .connection
                .as_ref()
                .and_then(|connection| connection.verkey())
                .or_else(|| inbound.recipient_key.clone());

            let reply = self
                .sender
                .pack_reply(&outbound.message, recipient_key, sender_key.as_deref())
                .await
                .map_err(|err| AgentError::SendError(err.to_string()))?;

            debug!("replying to {} over the return route", inbound.message_type);
            return Ok(Some(reply));
        }

        self.sender
            .send(outbound)
            .await
            .map_err(|err| AgentError::SendError(err.to_string()))?;

        Ok(None)
    }

    fn spawn_worker(&self, mut receiver: InboundReceiver) -> JoinHandle<()> {
        let agent = self.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                select! {
                    frame = receiver.recv() => match frame {
                        Some(frame) => {
                            let agent = agent.clone();
                            tokio::spawn(async move { agent.process_frame(frame).await });
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }

            debug!("inbound worker of {} stopped", agent.config.label);
        })
    }

    async fn process_frame(&self, frame: InboundFrame) {
        let session = frame.session.clone();

        match self.receive(frame.payload, frame.session).await {
            Ok(Some(reply)) => match session {
                Some(session) => {
                    if let Err(err) = session.send(reply).await {
                        warn!("reply lost, session closed: {}", err);
                    }
                }
                None => debug!("return routed reply without a session dropped"),
            },
            Ok(None) => {}
            Err(err) => warn!("inbound message failed: {}", err),
        }
    }
}

#[async_trait]
impl<TWallet> InboundHandler for Agent<TWallet>
where
    TWallet: Wallet + 'static,
{
    async fn handle(
        &self,
        payload: Vec<u8>,
        session: Option<SessionHandle>,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        self.receive(payload, session)
            .await
            .map_err(|err| TransportError::Fatal(err.to_string()))
    }
}
