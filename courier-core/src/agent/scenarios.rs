use std::sync::Arc;
use std::time::Duration;

use rst_common::standard::chrono::Utc;
use rst_common::standard::serde_json::{self, Value};
use rst_common::standard::uuid::Uuid;
use rst_common::with_tokio::tokio;
use rst_common::with_tokio::tokio::sync::broadcast::error::TryRecvError;
use rst_common::with_tokio::tokio::time::{sleep, timeout};

use crate::didcomm::envelope::types::Envelope;
use crate::didcomm::envelope::EnvelopePacker;
use crate::didcomm::events::{wait_for, AgentEvent};
use crate::didcomm::message::{AgentMessage, Attachment, ForwardMessage, MessageHeader};
use crate::didcomm::transport::types::SessionTransport;
use crate::didcomm::transport::{MemoryHub, MemoryTransport, TransportRegistry};
use crate::identity::connection::messages::{DidExchangeRequest, TrustPing};
use crate::identity::connection::types::{AcceptConfig, ConnectionAPI, ConnectionState};
use crate::identity::connection::ConnectionRecord;
use crate::identity::oob::types::{CreateInvitationConfig, OobState, OutOfBandAPI};
use crate::routing::mediator::types::QueuedMessage;
use crate::routing::mediator::InMemoryQueue;
use crate::routing::pickup::messages::{Delivery, DeliveryRequest};
use crate::routing::pickup::types::{PickupConfig, PickupStrategy};
use crate::storage::types::Query;
use crate::storage::Store;
use crate::wallet::crypto;
use crate::wallet::LocalWallet;

use super::config::AgentConfig;
use super::types::AgentError;
use super::Agent;

type TestAgent = Arc<Agent<LocalWallet>>;

const TIMEOUT: Duration = Duration::from_secs(10);
const MEDIATOR_ENDPOINT: &str = "memory://mediator";

fn transports(hub: &MemoryHub) -> TransportRegistry {
    let transport = Arc::new(MemoryTransport::new(hub.clone()));
    TransportRegistry::new()
        .with_outbound(transport.clone())
        .with_session(transport)
}

fn pickup_config(strategy: PickupStrategy) -> PickupConfig {
    PickupConfig {
        strategy,
        ..PickupConfig::default()
    }
}

async fn spawn_agent(hub: &MemoryHub, config: AgentConfig) -> TestAgent {
    let agent = Agent::new(
        LocalWallet::new(),
        Store::in_memory(),
        transports(hub),
        Arc::new(InMemoryQueue::new()),
        config,
    )
    .unwrap();

    let agent = Arc::new(agent);
    for endpoint in agent.config().endpoints.iter() {
        hub.register(endpoint, &agent).await;
    }

    agent
}

async fn spawn_mediator(hub: &MemoryHub) -> (TestAgent, String) {
    let config = AgentConfig::new("mediator")
        .with_endpoints(vec![MEDIATOR_ENDPOINT.to_string()])
        .with_pickup(pickup_config(PickupStrategy::None));

    let mediator = spawn_agent(hub, config).await;
    mediator.start().await.unwrap();

    let invitation = CreateInvitationConfig {
        multi_use: true,
        ..CreateInvitationConfig::default()
    };

    let (_, url) = mediator
        .out_of_band()
        .create_invitation_url(invitation, "https://mediator.example.com")
        .await
        .unwrap();

    (mediator, url)
}

async fn connection_on_thread(agent: &TestAgent, thread_id: &str) -> ConnectionRecord {
    let query = Query::new().with_tag("thread_id", thread_id);
    for _ in 0..250 {
        let found = agent.connections().find_by_query(&query).await.unwrap();
        if let Some(connection) = found.into_iter().next() {
            return connection;
        }

        sleep(Duration::from_millis(20)).await;
    }

    panic!("no connection on thread {}", thread_id)
}

async fn wait_live_sessions(mediator: &TestAgent, expected: usize) {
    for _ in 0..250 {
        let mut live = 0;
        for connection in mediator.connections().find_all().await.unwrap() {
            if mediator.sender().sessions().find(&connection.id).await.is_some() {
                live += 1;
            }
        }

        if live >= expected {
            return;
        }

        sleep(Duration::from_millis(20)).await;
    }

    panic!("live pickup sessions were never opened")
}

/// `connect` runs a full handshake from an invitation of `inviter`, returns both records once
/// they are complete
async fn connect(
    inviter: &TestAgent,
    invitee: &TestAgent,
) -> (ConnectionRecord, ConnectionRecord) {
    let (_, invitation) = inviter
        .out_of_band()
        .create_invitation(CreateInvitationConfig::default())
        .await
        .unwrap();

    let received = invitee
        .out_of_band()
        .receive_invitation(invitation)
        .await
        .unwrap();

    let requested = invitee
        .out_of_band()
        .accept_invitation(&received.id, AcceptConfig::default())
        .await
        .unwrap();

    let invitee_connection = invitee
        .connections()
        .return_when_is_connected(&requested.id, Some(TIMEOUT))
        .await
        .unwrap();

    let inviter_connection = connection_on_thread(inviter, &invitee_connection.thread_id).await;
    let inviter_connection = inviter
        .connections()
        .return_when_is_connected(&inviter_connection.id, Some(TIMEOUT))
        .await
        .unwrap();

    (inviter_connection, invitee_connection)
}

#[tokio::test]
async fn test_direct_handshake_completes_both_sides() {
    let hub = MemoryHub::new();
    let alice = spawn_agent(
        &hub,
        AgentConfig::new("alice").with_endpoints(vec!["memory://alice".to_string()]),
    )
    .await;

    let bob = spawn_agent(
        &hub,
        AgentConfig::new("bob").with_endpoints(vec!["memory://bob".to_string()]),
    )
    .await;

    alice.start().await.unwrap();
    bob.start().await.unwrap();

    let (alice_connection, bob_connection) = connect(&alice, &bob).await;
    assert_eq!(alice_connection.state, ConnectionState::Complete);
    assert_eq!(bob_connection.state, ConnectionState::Complete);
    assert_eq!(alice_connection.thread_id, bob_connection.thread_id);
    assert_eq!(alice_connection.their_verkey(), bob_connection.verkey());
    assert_eq!(bob_connection.their_verkey(), alice_connection.verkey());

    for agent in [&alice, &bob] {
        let records = agent.out_of_band().find_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, OobState::Done);
    }

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_single_use_invitation_accepts_one_requester() {
    let hub = MemoryHub::new();
    let alice = spawn_agent(
        &hub,
        AgentConfig::new("alice").with_endpoints(vec!["memory://alice".to_string()]),
    )
    .await;

    let bob = spawn_agent(
        &hub,
        AgentConfig::new("bob").with_endpoints(vec!["memory://bob".to_string()]),
    )
    .await;

    let carol = spawn_agent(
        &hub,
        AgentConfig::new("carol").with_endpoints(vec!["memory://carol".to_string()]),
    )
    .await;

    let (_, invitation) = alice
        .out_of_band()
        .create_invitation(CreateInvitationConfig::default())
        .await
        .unwrap();

    let for_bob = bob
        .out_of_band()
        .receive_invitation(invitation.clone())
        .await
        .unwrap();

    let for_carol = carol
        .out_of_band()
        .receive_invitation(invitation)
        .await
        .unwrap();

    bob.out_of_band()
        .accept_invitation(&for_bob.id, AcceptConfig::default())
        .await
        .unwrap();

    let rejected = carol
        .out_of_band()
        .accept_invitation(&for_carol.id, AcceptConfig::default())
        .await;
    assert!(rejected.is_err());

    let connections = alice.connections().find_all().await.unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].their_label, Some("bob".to_string()));
}

#[tokio::test]
async fn test_replayed_request_is_rejected() {
    let hub = MemoryHub::new();
    let alice = spawn_agent(
        &hub,
        AgentConfig::new("alice").with_endpoints(vec!["memory://alice".to_string()]),
    )
    .await;

    let bob = spawn_agent(
        &hub,
        AgentConfig::new("bob").with_endpoints(vec!["memory://bob".to_string()]),
    )
    .await;

    let (alice_connection, bob_connection) = connect(&alice, &bob).await;
    let out_of_band = alice
        .out_of_band()
        .get_by_id(alice_connection.out_of_band_id.as_deref().unwrap())
        .await
        .unwrap();

    let doc = serde_json::to_vec(&bob_connection.did_doc).unwrap();
    let mut request = DidExchangeRequest {
        header: MessageHeader::new(DidExchangeRequest::TYPE),
        label: "bob".to_string(),
        goal_code: None,
        goal: None,
        did: bob_connection.did.clone(),
        did_doc_attach: Some(Attachment::from_base64(crypto::b64_encode(&doc))),
    };
    request.header.id = bob_connection.thread_id.clone();
    request.set_thread(None, Some(out_of_band.invitation_id()));

    let invitation_key = out_of_band.invitation.invitation_key().unwrap();
    let replayed = bob
        .sender()
        .pack_reply(
            &request.to_value().unwrap(),
            &invitation_key,
            bob_connection.verkey().as_deref(),
        )
        .await
        .unwrap();

    let result = alice.receive(replayed, None).await;
    assert!(matches!(
        result,
        Err(AgentError::DispatchError(msg)) if msg.contains("protocol violation")
    ));

    let unchanged = alice
        .connections()
        .get_by_id(&alice_connection.id)
        .await
        .unwrap();
    assert_eq!(unchanged.state, ConnectionState::Complete);
    assert_eq!(alice.connections().find_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_mediated_agents_connect_through_forwards() {
    let hub = MemoryHub::new();
    let (mediator, url) = spawn_mediator(&hub).await;

    let mediated = |label: &str| {
        AgentConfig::new(label)
            .with_mediator_invitation_url(&url)
            .with_pickup(pickup_config(PickupStrategy::PickupV2LiveMode))
    };

    let alice = spawn_agent(&hub, mediated("alice")).await;
    let bob = spawn_agent(&hub, mediated("bob")).await;

    let alice_mediation = alice.start().await.unwrap().unwrap();
    let bob_mediation = bob.start().await.unwrap().unwrap();
    assert!(alice_mediation.default);
    assert!(bob_mediation.is_granted());
    assert_eq!(alice_mediation.endpoint, Some(MEDIATOR_ENDPOINT.to_string()));

    wait_live_sessions(&mediator, 2).await;
    let mut observed = mediator.events().subscribe();

    let (alice_connection, bob_connection) = connect(&alice, &bob).await;
    let routing_keys = mediator.mediator().routing_keys().await.unwrap();
    for service in alice_connection.did_doc.services() {
        assert_eq!(service.service_endpoint, MEDIATOR_ENDPOINT);
        assert_eq!(service.routing_keys, routing_keys);
    }

    let mut pings = bob.events().subscribe();
    bob.connections()
        .send_ping(&bob_connection.id, true)
        .await
        .unwrap();

    let event = wait_for(&mut pings, TIMEOUT, |event| {
        matches!(event, AgentEvent::TrustPingResponseReceived { .. })
    })
    .await
    .unwrap();

    assert!(matches!(
        event,
        AgentEvent::TrustPingResponseReceived { connection_id, .. } if connection_id == bob_connection.id
    ));

    let mut received: Vec<(String, Value)> = Vec::new();
    loop {
        match observed.try_recv() {
            Ok(AgentEvent::MessageReceived {
                message_type,
                message,
                ..
            }) => received.push((message_type, message)),
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    assert!(received.iter().all(|(message_type, _)| {
        !message_type.contains("didexchange") && !message_type.contains("trust_ping")
    }));

    let alice_key = alice_connection.verkey().unwrap();
    let to_alice = received
        .iter()
        .filter(|(message_type, _)| message_type.ends_with("/forward"))
        .filter_map(|(_, message)| ForwardMessage::from_value(message).ok())
        .filter(|forward| forward.to == alice_key)
        .collect::<Vec<ForwardMessage>>();

    assert!(!to_alice.is_empty());
    for forward in to_alice {
        assert_eq!(forward.msg.recipient_keys().unwrap(), vec![alice_key.clone()]);
    }

    alice.shutdown().await;
    bob.shutdown().await;
    mediator.shutdown().await;
}

#[tokio::test]
async fn test_unacknowledged_delivery_stays_queued_and_live_pickup_reconnects() {
    let hub = MemoryHub::new();
    let (mediator, url) = spawn_mediator(&hub).await;

    let config = AgentConfig::new("recipient")
        .with_mediator_invitation_url(&url)
        .with_pickup(pickup_config(PickupStrategy::None));

    let recipient = spawn_agent(&hub, config).await;
    let mediation = recipient.start().await.unwrap().unwrap();

    let own = recipient
        .connections()
        .get_by_id(&mediation.connection_id)
        .await
        .unwrap();

    let on_mediator = mediator.connections().find_all().await.unwrap();
    assert_eq!(on_mediator.len(), 1);
    let queued_for = on_mediator[0].id.clone();

    let recipient_key = own.verkey().unwrap();
    let outsider = EnvelopePacker::new(LocalWallet::new());
    let queue = mediator.mediator().queue();
    for _ in 0..5 {
        let ping = serde_json::to_vec(&TrustPing::new(false).to_value().unwrap()).unwrap();
        let envelope = outsider
            .pack(&ping, &[recipient_key.clone()], None)
            .await
            .unwrap();

        queue
            .add(QueuedMessage {
                id: Uuid::new_v4().to_string(),
                connection_id: queued_for.clone(),
                recipient_key: recipient_key.clone(),
                encrypted_message: envelope,
                received_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let transport = MemoryTransport::new(hub.clone());
    let mut session = transport.open_session(MEDIATOR_ENDPOINT).await.unwrap();

    let mut request = DeliveryRequest::new(2);
    request.set_return_route();
    let bytes = recipient
        .sender()
        .pack_reply(
            &request.to_value().unwrap(),
            &own.their_verkey().unwrap(),
            Some(&recipient_key),
        )
        .await
        .unwrap();

    session.handle.send(bytes).await.unwrap();
    let reply = timeout(TIMEOUT, session.receiver.recv())
        .await
        .unwrap()
        .unwrap();

    let unpacked = EnvelopePacker::new(recipient.wallet())
        .unpack(&Envelope::try_from(reply).unwrap())
        .await
        .unwrap();

    let message: Value = serde_json::from_slice(&unpacked.plaintext).unwrap();
    let delivery = Delivery::from_value(&message).unwrap();
    assert_eq!(delivery.envelopes().unwrap().len(), 2);

    drop(session);
    assert_eq!(queue.count(&queued_for).await.unwrap(), 5);

    hub.set_offline(MEDIATOR_ENDPOINT, true).await;
    let mut events = recipient.events().subscribe();

    let mut live = mediation.clone();
    live.pickup_strategy = Some(PickupStrategy::PickupV2LiveMode);
    recipient.pickup().start(&live).await.unwrap();

    let scheduled = wait_for(&mut events, TIMEOUT, |event| {
        matches!(event, AgentEvent::PickupReconnectScheduled { .. })
    })
    .await
    .unwrap();

    assert_eq!(
        scheduled,
        AgentEvent::PickupReconnectScheduled {
            connection_id: mediation.connection_id.clone(),
            attempt: 0,
            delay: Duration::from_millis(100),
        }
    );

    hub.set_offline(MEDIATOR_ENDPOINT, false).await;
    let completed = wait_for(&mut events, TIMEOUT, |event| {
        matches!(event, AgentEvent::MessagePickupCompleted { total: 5, .. })
    })
    .await
    .unwrap();

    assert_eq!(
        completed,
        AgentEvent::MessagePickupCompleted {
            connection_id: mediation.connection_id.clone(),
            total: 5,
        }
    );

    recipient.shutdown().await;
    mediator.shutdown().await;
}
