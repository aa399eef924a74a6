//! `events` is the observable side of the agent. Every state transition of a stateful record
//! is published as an [`AgentEvent`] on a broadcast channel.
use std::time::Duration;

use rst_common::standard::serde_json::Value;
use rst_common::with_errors::thiserror::{self, Error};
use rst_common::with_logging::log::debug;
use rst_common::with_tokio::tokio::{self, sync::broadcast};

use crate::identity::connection::types::ConnectionState;
use crate::identity::oob::types::OobState;
use crate::routing::mediation::types::MediationState;

const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, PartialEq, Error)]
pub enum EventError {
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("event stream closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ConnectionStateChanged {
        connection_id: String,
        previous: Option<ConnectionState>,
        state: ConnectionState,
    },
    OutOfBandStateChanged {
        out_of_band_id: String,
        previous: Option<OobState>,
        state: OobState,
    },
    MediationStateChanged {
        mediation_id: String,
        previous: Option<MediationState>,
        state: MediationState,
    },
    KeylistUpdated {
        mediation_id: String,
        keys: Vec<String>,
    },
    TrustPingReceived {
        connection_id: String,
        thread_id: String,
    },
    TrustPingResponseReceived {
        connection_id: String,
        thread_id: String,
    },
    MessagePickupCompleted {
        connection_id: String,
        total: usize,
    },
    PickupReconnectScheduled {
        connection_id: String,
        attempt: u32,
        delay: Duration,
    },
    MessageReceived {
        connection_id: Option<String>,
        message_type: String,
        message: Value,
    },
}

/// `EventEmitter` is cheap to clone, every clone publishes on the same channel
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<AgentEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: AgentEvent) {
        if self.sender.send(event).is_err() {
            debug!("event emitted without subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}

/// `wait_for` consumes events from `receiver` until one matches `predicate`
///
/// Lagged receivers skip the dropped events and keep waiting.
pub async fn wait_for<F>(
    receiver: &mut broadcast::Receiver<AgentEvent>,
    timeout: Duration,
    predicate: F,
) -> Result<AgentEvent, EventError>
where
    F: Fn(&AgentEvent) -> bool,
{
    let waiting = async {
        loop {
            match receiver.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("event receiver lagged, skipped: {}", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(EventError::Closed),
            }
        }
    };

    tokio::time::timeout(timeout, waiting)
        .await
        .map_err(|_| EventError::Timeout(format!("no matching event after {:?}", timeout)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_matching_event() {
        let emitter = EventEmitter::default();
        let mut receiver = emitter.subscribe();

        emitter.emit(AgentEvent::TrustPingReceived {
            connection_id: "conn-1".to_string(),
            thread_id: "thread-1".to_string(),
        });
        emitter.emit(AgentEvent::MessagePickupCompleted {
            connection_id: "conn-1".to_string(),
            total: 3,
        });

        let event = wait_for(&mut receiver, Duration::from_millis(100), |event| {
            matches!(event, AgentEvent::MessagePickupCompleted { .. })
        })
        .await
        .unwrap();

        assert_eq!(
            event,
            AgentEvent::MessagePickupCompleted {
                connection_id: "conn-1".to_string(),
                total: 3
            }
        )
    }

    #[tokio::test]
    async fn test_wait_for_timeout() {
        let emitter = EventEmitter::default();
        let mut receiver = emitter.subscribe();

        let result = wait_for(&mut receiver, Duration::from_millis(20), |_| true).await;
        assert!(matches!(result.unwrap_err(), EventError::Timeout(_)))
    }
}
