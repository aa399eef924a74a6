use std::sync::Arc;

use rst_common::with_logging::log::{debug, error, info, warn};
use rst_common::with_tokio::tokio::sync::{mpsc, watch, Mutex};
use rst_common::with_tokio::tokio::task::JoinHandle;
use rst_common::with_tokio::tokio::{self, select};

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::events::{AgentEvent, EventEmitter};
use crate::didcomm::message::AgentMessage;
use crate::didcomm::sender::MessageSender;
use crate::didcomm::transport::{InboundFrame, ReconnectBackoff, TransportSession};
use crate::identity::connection::ConnectionRecord;
use crate::routing::mediation::MediationRecord;
use crate::storage::Store;
use crate::wallet::types::Wallet;

use super::messages::{
    Batch, BatchPickup, Delivery, DeliveryRequest, LiveDeliveryChange, MessagesReceived, Status,
    StatusRequest,
};
use super::types::{PickupConfig, PickupError, PickupStrategy};

struct PickupTask {
    mediation_id: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// `PickupUsecase` is the recipient side of the pickup protocols
///
/// A single background task runs per agent, starting pickup for another mediator stops the
/// current one first.
#[derive(Clone)]
pub struct PickupUsecase<TWallet>
where
    TWallet: Wallet,
{
    store: Store,
    events: EventEmitter,
    sender: MessageSender<TWallet>,
    config: PickupConfig,
    inbound: mpsc::UnboundedSender<InboundFrame>,
    task: Arc<Mutex<Option<PickupTask>>>,
}

impl<TWallet> PickupUsecase<TWallet>
where
    TWallet: Wallet + 'static,
{
    pub fn new(
        store: Store,
        events: EventEmitter,
        sender: MessageSender<TWallet>,
        config: PickupConfig,
        inbound: mpsc::UnboundedSender<InboundFrame>,
    ) -> Self {
        Self {
            store,
            events,
            sender,
            config,
            inbound,
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> PickupConfig {
        self.config.clone()
    }

    /// `strategy_for` prefers the strategy stored with the mediation over the agent default
    pub fn strategy_for(&self, mediation: &MediationRecord) -> PickupStrategy {
        mediation.pickup_strategy.unwrap_or(self.config.strategy)
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    async fn get_connection(&self, connection_id: &str) -> Result<ConnectionRecord, PickupError> {
        self.store
            .get_by_id::<ConnectionRecord>(connection_id)
            .await
            .map_err(|err| PickupError::MediationError(err.to_string()))
    }

    async fn send_to_mediator<T: AgentMessage>(
        &self,
        mediation: &MediationRecord,
        mut message: T,
    ) -> Result<(), PickupError> {
        message.set_return_route();

        let connection = self.get_connection(&mediation.connection_id).await?;
        let ctx = OutboundMessageContext::new(&message, Some(connection))
            .map_err(|err| PickupError::MessageError(err.to_string()))?
            .with_associated_record(&mediation.id);

        self.sender
            .send(ctx)
            .await
            .map_err(|err| PickupError::SendError(err.to_string()))
    }

    /// `pickup_messages` runs a single polling round, the answers are processed by the pickup
    /// handlers as they arrive
    pub async fn pickup_messages(
        &self,
        mediation: &MediationRecord,
        strategy: PickupStrategy,
    ) -> Result<(), PickupError> {
        if !mediation.is_granted() {
            return Err(PickupError::MediationError(format!(
                "mediation {} is {}",
                mediation.id, mediation.state
            )));
        }

        match strategy {
            PickupStrategy::PickupV1 => {
                let pickup = BatchPickup::new(self.config.maximum_message_pickup);
                self.send_to_mediator(mediation, pickup).await
            }
            PickupStrategy::PickupV2 | PickupStrategy::PickupV2LiveMode => {
                self.send_to_mediator(mediation, StatusRequest::new()).await
            }
            PickupStrategy::None => Err(PickupError::InvalidStrategy(strategy.to_string())),
        }
    }

    /// `start` spawns the background pickup for the mediation
    pub async fn start(&self, mediation: &MediationRecord) -> Result<(), PickupError> {
        let strategy = self.strategy_for(mediation);
        if strategy == PickupStrategy::None {
            info!("message pickup disabled for mediation: {}", mediation.id);
            return Ok(());
        }

        if !mediation.is_granted() {
            return Err(PickupError::MediationError(format!(
                "mediation {} is {}",
                mediation.id, mediation.state
            )));
        }

        // the slot stays locked until the new task is stored, concurrent starts run one by one
        let mut slot = self.task.lock().await;
        if let Some(previous) = slot.take() {
            Self::end(previous).await;
        }

        let (stop, stop_rx) = watch::channel(false);
        let usecase = self.clone();
        let record = mediation.clone();

        let handle = tokio::spawn(async move {
            match strategy {
                PickupStrategy::PickupV2LiveMode => usecase.run_live(record, stop_rx).await,
                _ => usecase.run_polling(record, strategy, stop_rx).await,
            }
        });

        info!(
            "message pickup started for mediation {}: {}",
            mediation.id, strategy
        );

        *slot = Some(PickupTask {
            mediation_id: mediation.id.clone(),
            stop,
            handle,
        });

        Ok(())
    }

    /// `stop` ends the background pickup, stopping an already stopped pickup does nothing
    pub async fn stop(&self) {
        let mut slot = self.task.lock().await;
        if let Some(task) = slot.take() {
            Self::end(task).await;
        }
    }

    async fn end(task: PickupTask) {
        if task.stop.send(true).is_err() {
            debug!("pickup task already finished: {}", task.mediation_id);
        }

        if let Err(err) = task.handle.await {
            warn!("pickup task ended abnormally: {}", err);
        }

        info!("message pickup stopped for mediation: {}", task.mediation_id);
    }

    async fn run_polling(
        &self,
        mediation: MediationRecord,
        strategy: PickupStrategy,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            if *stop.borrow() {
                break;
            }

            if let Err(err) = self.pickup_messages(&mediation, strategy).await {
                warn!("pickup round failed for {}: {}", mediation.id, err);
            }

            select! {
                _ = tokio::time::sleep(self.config.polling_interval) => {}
                _ = stop.changed() => break,
            }
        }
    }

    async fn open_live_session(
        &self,
        mediation: &MediationRecord,
    ) -> Result<TransportSession, PickupError> {
        let endpoint = mediation
            .endpoint
            .clone()
            .ok_or(PickupError::MediationError(format!(
                "mediation {} has no endpoint",
                mediation.id
            )))?;

        let transport = self
            .sender
            .transports()
            .session_for(&endpoint)
            .map_err(|err| PickupError::TransportError(err.to_string()))?;

        let session = transport
            .open_session(&endpoint)
            .await
            .map_err(|err| PickupError::TransportError(err.to_string()))?;

        self.sender
            .sessions()
            .register(&mediation.connection_id, session.handle.clone())
            .await;

        self.send_to_mediator(mediation, StatusRequest::new()).await?;
        self.send_to_mediator(mediation, LiveDeliveryChange::new(true))
            .await?;

        Ok(session)
    }

    /// `forward_frames` pushes the session frames into the inbound queue until the session
    /// drops, gives `true` when the loop ended because of a stop request
    async fn forward_frames(
        &self,
        session: &mut TransportSession,
        stop: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            select! {
                frame = session.receiver.recv() => match frame {
                    Some(payload) => {
                        let frame = InboundFrame::new(payload, Some(session.handle.clone()));
                        if self.inbound.send(frame).is_err() {
                            error!("inbound queue closed, live pickup ends");
                            return true;
                        }
                    }
                    None => return false,
                },
                _ = stop.changed() => return true,
            }
        }
    }

    async fn run_live(&self, mediation: MediationRecord, mut stop: watch::Receiver<bool>) {
        let mut backoff = ReconnectBackoff::new(
            self.config.base_reconnection_interval,
            self.config.maximum_reconnection_interval,
        );

        loop {
            if *stop.borrow() {
                break;
            }

            match self.open_live_session(&mediation).await {
                Ok(mut session) => {
                    backoff.reset();
                    info!("live pickup session opened: {}", mediation.connection_id);

                    let stopped = self.forward_frames(&mut session, &mut stop).await;
                    self.sender.sessions().remove(&mediation.connection_id).await;

                    if stopped {
                        if let Err(err) = self
                            .send_to_mediator(&mediation, LiveDeliveryChange::new(false))
                            .await
                        {
                            debug!("live delivery not disabled on stop: {}", err);
                        }

                        break;
                    }

                    warn!("live pickup session dropped: {}", mediation.connection_id);
                }
                Err(err) => {
                    self.sender.sessions().remove(&mediation.connection_id).await;
                    warn!("live pickup session failed: {}", err);
                }
            }

            let attempt = backoff.attempt();
            let delay = backoff.next_delay();
            self.events.emit(AgentEvent::PickupReconnectScheduled {
                connection_id: mediation.connection_id.clone(),
                attempt,
                delay,
            });

            debug!(
                "live pickup reconnect attempt {} in {:?}",
                attempt, delay
            );

            select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => break,
            }
        }
    }

    fn push_envelopes(&self, envelopes: Vec<Vec<u8>>) -> Result<usize, PickupError> {
        let total = envelopes.len();
        for payload in envelopes {
            self.inbound
                .send(InboundFrame::new(payload, None))
                .map_err(|err| PickupError::QueueError(err.to_string()))?;
        }

        Ok(total)
    }

    /// `process_batch` redispatches every envelope of a v1 batch
    pub async fn process_batch(&self, ctx: &InboundMessageContext) -> Result<(), PickupError> {
        let connection = ctx
            .assert_ready_connection()
            .map_err(|err| PickupError::MessageError(err.to_string()))?;

        let batch = ctx
            .message_as::<Batch>()
            .map_err(|err| PickupError::MessageError(err.to_string()))?;

        let envelopes = batch
            .messages
            .into_iter()
            .map(|item| item.message.to_bytes())
            .collect::<Result<Vec<Vec<u8>>, _>>()
            .map_err(|err| PickupError::MessageError(err.to_string()))?;

        let total = self.push_envelopes(envelopes)?;
        debug!("batch picked up from {}: {}", connection.id, total);

        self.events.emit(AgentEvent::MessagePickupCompleted {
            connection_id: connection.id.clone(),
            total,
        });

        Ok(())
    }

    /// `process_status` asks for the queued messages when the mediator reports any
    pub async fn process_status(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, PickupError> {
        let connection = ctx
            .assert_ready_connection()
            .map_err(|err| PickupError::MessageError(err.to_string()))?;

        let status = ctx
            .message_as::<Status>()
            .map_err(|err| PickupError::MessageError(err.to_string()))?;

        if status.message_count == 0 {
            debug!("no message queued by {}", connection.id);
            return Ok(None);
        }

        let limit = status
            .message_count
            .min(self.config.maximum_message_pickup);

        let mut request = DeliveryRequest::new(limit);
        request.set_return_route();

        OutboundMessageContext::new(&request, Some(connection.clone()))
            .map(Some)
            .map_err(|err| PickupError::MessageError(err.to_string()))
    }

    /// `process_delivery` redispatches the delivered envelopes and acknowledges them
    pub async fn process_delivery(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, PickupError> {
        let connection = ctx
            .assert_ready_connection()
            .map_err(|err| PickupError::MessageError(err.to_string()))?;

        let delivery = ctx
            .message_as::<Delivery>()
            .map_err(|err| PickupError::MessageError(err.to_string()))?;

        let envelopes = delivery
            .envelopes()
            .map_err(|err| PickupError::MessageError(err.to_string()))?;

        let mut ids = Vec::new();
        let mut payloads = Vec::new();
        for (id, envelope) in envelopes {
            let payload = envelope
                .to_bytes()
                .map_err(|err| PickupError::MessageError(err.to_string()))?;

            ids.push(id);
            payloads.push(payload);
        }

        let total = self.push_envelopes(payloads)?;
        self.events.emit(AgentEvent::MessagePickupCompleted {
            connection_id: connection.id.clone(),
            total,
        });

        let mut received = MessagesReceived::new(ids);
        received.set_thread(Some(delivery.thread_id()), None);
        received.set_return_route();

        OutboundMessageContext::new(&received, Some(connection.clone()))
            .map(Some)
            .map_err(|err| PickupError::MessageError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rst_common::standard::async_trait::async_trait;
    use rst_common::standard::serde_json::{json, Value};

    use crate::didcomm::envelope::types::Envelope;
    use crate::didcomm::envelope::EnvelopePacker;
    use crate::didcomm::events::wait_for;
    use crate::didcomm::sender::types::RetryPolicy;
    use crate::didcomm::transport::types::{SessionTransport, TransportError};
    use crate::didcomm::transport::{SessionRegistry, TransportRegistry};
    use crate::identity::connection::types::{
        ConnectionRole, ConnectionState, HandshakeProtocol,
    };
    use crate::identity::did::types::DidDoc;
    use crate::routing::mediation::types::{MediationRole, MediationState};
    use crate::wallet::LocalWallet;

    /// `RefusingTransport` never opens a session, every attempt fails
    struct RefusingTransport;

    #[async_trait]
    impl SessionTransport for RefusingTransport {
        fn supported_schemes(&self) -> Vec<String> {
            vec!["memory".to_string()]
        }

        async fn open_session(&self, endpoint: &str) -> Result<TransportSession, TransportError> {
            Err(TransportError::Transient(format!("refused: {}", endpoint)))
        }
    }

    struct Fixture {
        usecase: PickupUsecase<LocalWallet>,
        events: EventEmitter,
        inbound: mpsc::UnboundedReceiver<InboundFrame>,
        connection: ConnectionRecord,
        mediation: MediationRecord,
    }

    async fn fixture(config: PickupConfig) -> Fixture {
        let wallet = LocalWallet::new();
        let store = Store::in_memory();
        let events = EventEmitter::default();
        let transports = TransportRegistry::new().with_session(Arc::new(RefusingTransport));

        let sender = MessageSender::new(
            wallet.clone(),
            transports,
            SessionRegistry::new(),
            store.clone(),
            RetryPolicy::default(),
        );

        let own_key = wallet.create_key().await.unwrap();
        let mut connection = ConnectionRecord::new(
            ConnectionRole::Requester,
            HandshakeProtocol::DidExchange,
            ConnectionState::Complete,
            "did-recipient".to_string(),
            DidDoc::new("did-recipient", &own_key, &[], &[]),
            "thread-1".to_string(),
        );
        store.save(&mut connection).await.unwrap();

        let mut mediation = MediationRecord::new(
            MediationRole::Recipient,
            MediationState::Granted,
            &connection.id,
            "thread-2",
        );
        mediation.endpoint = Some("memory://mediator".to_string());
        store.save(&mut mediation).await.unwrap();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let usecase = PickupUsecase::new(store, events.clone(), sender, config, inbound_tx);

        Fixture {
            usecase,
            events,
            inbound: inbound_rx,
            connection,
            mediation,
        }
    }

    fn inbound(message: Value, connection: &ConnectionRecord) -> InboundMessageContext {
        InboundMessageContext::new(message, None, None)
            .unwrap()
            .with_connection(Some(connection.clone()))
    }

    async fn envelope(content: &str) -> Envelope {
        let wallet = LocalWallet::new();
        let key = wallet.create_key().await.unwrap();
        EnvelopePacker::new(wallet)
            .pack(content.as_bytes(), &[key], None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_requests_delivery_within_limit() {
        let config = PickupConfig {
            maximum_message_pickup: 3,
            ..PickupConfig::default()
        };
        let fixture = fixture(config).await;

        let status = json!({
            "@id": "status-1",
            "@type": "https://didcomm.org/messagepickup/2.0/status",
            "message_count": 7
        });

        let outbound = fixture
            .usecase
            .process_status(&inbound(status, &fixture.connection))
            .await
            .unwrap()
            .unwrap();

        let request = DeliveryRequest::from_value(&outbound.message).unwrap();
        assert_eq!(request.limit, 3);
        assert!(request.header.has_return_route());

        let empty = json!({
            "@id": "status-2",
            "@type": "https://didcomm.org/messagepickup/2.0/status",
            "message_count": 0
        });

        let outbound = fixture
            .usecase
            .process_status(&inbound(empty, &fixture.connection))
            .await
            .unwrap();
        assert!(outbound.is_none())
    }

    #[tokio::test]
    async fn test_delivery_is_redispatched_and_acknowledged() {
        let mut fixture = fixture(PickupConfig::default()).await;
        let mut receiver = fixture.events.subscribe();

        let delivery = Delivery::new(vec![
            ("msg-1".to_string(), envelope("first").await),
            ("msg-2".to_string(), envelope("second").await),
        ])
        .unwrap();

        let outbound = fixture
            .usecase
            .process_delivery(&inbound(delivery.to_value().unwrap(), &fixture.connection))
            .await
            .unwrap()
            .unwrap();

        let received = MessagesReceived::from_value(&outbound.message).unwrap();
        assert_eq!(
            received.message_id_list,
            vec!["msg-1".to_string(), "msg-2".to_string()]
        );
        assert_eq!(received.thread_id(), delivery.id());

        for _ in 0..2 {
            let frame = fixture.inbound.recv().await.unwrap();
            assert!(frame.session.is_none());
        }

        let event = wait_for(&mut receiver, Duration::from_millis(100), |event| {
            matches!(event, AgentEvent::MessagePickupCompleted { .. })
        })
        .await
        .unwrap();

        assert_eq!(
            event,
            AgentEvent::MessagePickupCompleted {
                connection_id: fixture.connection.id.clone(),
                total: 2
            }
        )
    }

    #[tokio::test]
    async fn test_batch_is_redispatched() {
        let mut fixture = fixture(PickupConfig::default()).await;
        let picked = envelope("first").await;

        let batch = json!({
            "@id": "batch-1",
            "@type": "https://didcomm.org/messagepickup/1.0/batch",
            "messages~attach": [
                {"id": "msg-1", "message": picked.clone()}
            ]
        });

        fixture
            .usecase
            .process_batch(&inbound(batch, &fixture.connection))
            .await
            .unwrap();

        let frame = fixture.inbound.recv().await.unwrap();
        assert_eq!(frame.payload, picked.to_bytes().unwrap())
    }

    #[tokio::test]
    async fn test_live_reconnect_backoff_and_idempotent_stop() {
        let config = PickupConfig {
            base_reconnection_interval: Duration::from_millis(10),
            maximum_reconnection_interval: Some(Duration::from_millis(40)),
            ..PickupConfig::default()
        };
        let fixture = fixture(config).await;
        let mut receiver = fixture.events.subscribe();

        fixture.usecase.start(&fixture.mediation).await.unwrap();
        assert!(fixture.usecase.is_running().await);

        let mut delays = Vec::new();
        while delays.len() < 5 {
            let event = wait_for(&mut receiver, Duration::from_secs(2), |event| {
                matches!(event, AgentEvent::PickupReconnectScheduled { .. })
            })
            .await
            .unwrap();

            if let AgentEvent::PickupReconnectScheduled { attempt, delay, .. } = event {
                assert_eq!(attempt as usize, delays.len());
                delays.push(delay.as_millis());
            }
        }

        assert_eq!(delays, vec![10, 20, 40, 40, 40]);

        fixture.usecase.stop().await;
        assert!(!fixture.usecase.is_running().await);
        fixture.usecase.stop().await;
        assert!(!fixture.usecase.is_running().await)
    }

    #[tokio::test]
    async fn test_concurrent_starts_keep_a_single_loop() {
        let config = PickupConfig {
            base_reconnection_interval: Duration::from_millis(10),
            maximum_reconnection_interval: Some(Duration::from_millis(10)),
            ..PickupConfig::default()
        };
        let fixture = fixture(config).await;

        let (first, second) = tokio::join!(
            fixture.usecase.start(&fixture.mediation),
            fixture.usecase.start(&fixture.mediation)
        );
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(fixture.usecase.is_running().await);

        fixture.usecase.stop().await;
        assert!(!fixture.usecase.is_running().await);

        let mut receiver = fixture.events.subscribe();
        let scheduled = wait_for(&mut receiver, Duration::from_millis(200), |event| {
            matches!(event, AgentEvent::PickupReconnectScheduled { .. })
        })
        .await;
        assert!(scheduled.is_err())
    }

    #[tokio::test]
    async fn test_start_without_strategy_does_nothing() {
        let config = PickupConfig {
            strategy: PickupStrategy::None,
            ..PickupConfig::default()
        };
        let fixture = fixture(config).await;

        fixture.usecase.start(&fixture.mediation).await.unwrap();
        assert!(!fixture.usecase.is_running().await);

        let result = fixture
            .usecase
            .pickup_messages(&fixture.mediation, PickupStrategy::None)
            .await;
        assert!(matches!(
            result.unwrap_err(),
            PickupError::InvalidStrategy(_)
        ))
    }
}
