use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use rst_common::standard::async_trait::async_trait;
use rst_common::with_logging::log::{debug, warn};
use rst_common::with_tokio::tokio::{self, sync::mpsc, sync::RwLock};

use super::session::{SessionHandle, TransportSession};
use super::types::{
    InboundHandler, OutboundTransport, SessionId, SessionTransport, TransportError,
};

pub const MEMORY_SCHEME: &str = "memory";

const SESSION_BUFFER: usize = 64;

/// `MemoryHub` routes frames between agents living in the same process
///
/// Handlers are kept as weak references, an agent dropped by its owner simply becomes
/// unreachable. An endpoint can be taken offline to simulate transient network failures.
#[derive(Clone, Default)]
pub struct MemoryHub {
    handlers: Arc<RwLock<HashMap<String, Weak<dyn InboundHandler>>>>,
    offline: Arc<RwLock<HashSet<String>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register<THandler>(&self, endpoint: &str, handler: &Arc<THandler>)
    where
        THandler: InboundHandler + 'static,
    {
        let weak: Weak<dyn InboundHandler> = Arc::downgrade(handler) as Weak<dyn InboundHandler>;
        self.handlers
            .write()
            .await
            .insert(endpoint.to_string(), weak);
    }

    pub async fn set_offline(&self, endpoint: &str, offline: bool) {
        let mut endpoints = self.offline.write().await;
        if offline {
            endpoints.insert(endpoint.to_string());
        } else {
            endpoints.remove(endpoint);
        }
    }

    async fn handler(&self, endpoint: &str) -> Result<Arc<dyn InboundHandler>, TransportError> {
        if self.offline.read().await.contains(endpoint) {
            return Err(TransportError::Transient(format!(
                "endpoint offline: {}",
                endpoint
            )));
        }

        self.handlers
            .read()
            .await
            .get(endpoint)
            .and_then(|weak| weak.upgrade())
            .ok_or(TransportError::Transient(format!(
                "endpoint unreachable: {}",
                endpoint
            )))
    }
}

/// `MemoryTransport` implements both transport traits on top of a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

impl MemoryTransport {
    pub fn new(hub: MemoryHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl OutboundTransport for MemoryTransport {
    fn supported_schemes(&self) -> Vec<String> {
        vec![MEMORY_SCHEME.to_string()]
    }

    async fn send(
        &self,
        endpoint: &str,
        payload: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let handler = self.hub.handler(endpoint).await?;
        handler.handle(payload, None).await
    }
}

#[async_trait]
impl SessionTransport for MemoryTransport {
    fn supported_schemes(&self) -> Vec<String> {
        vec![MEMORY_SCHEME.to_string()]
    }

    async fn open_session(&self, endpoint: &str) -> Result<TransportSession, TransportError> {
        let handler = self.hub.handler(endpoint).await?;
        let session_id = SessionId::generate();

        let (to_remote, mut from_local) = mpsc::channel::<Vec<u8>>(SESSION_BUFFER);
        let (to_local, from_remote) = mpsc::channel::<Vec<u8>>(SESSION_BUFFER);

        let remote_handle = SessionHandle::new(session_id.clone(), to_local);
        let endpoint_name = endpoint.to_string();

        tokio::spawn(async move {
            while let Some(frame) = from_local.recv().await {
                match handler.handle(frame, Some(remote_handle.clone())).await {
                    Ok(Some(reply)) => {
                        if remote_handle.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!("session frame rejected by {}: {}", endpoint_name, err),
                }
            }

            debug!("memory session closed: {}", endpoint_name);
        });

        Ok(TransportSession {
            handle: SessionHandle::new(session_id, to_remote),
            receiver: from_remote,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn handle(
            &self,
            payload: Vec<u8>,
            session: Option<SessionHandle>,
        ) -> Result<Option<Vec<u8>>, TransportError> {
            if let Some(session) = session {
                session.send(b"pushed".to_vec()).await?;
            }

            Ok(Some(payload))
        }
    }

    #[tokio::test]
    async fn test_send_and_offline() {
        let hub = MemoryHub::new();
        let handler = Arc::new(EchoHandler);
        hub.register("memory://echo", &handler).await;

        let transport = MemoryTransport::new(hub.clone());
        let reply = transport
            .send("memory://echo", b"hello".to_vec())
            .await
            .unwrap();
        assert_eq!(reply, Some(b"hello".to_vec()));

        hub.set_offline("memory://echo", true).await;
        let result = transport.send("memory://echo", b"hello".to_vec()).await;
        assert!(result.unwrap_err().is_transient());

        hub.set_offline("memory://echo", false).await;
        drop(handler);
        let result = transport.send("memory://echo", b"hello".to_vec()).await;
        assert!(result.unwrap_err().is_transient())
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let hub = MemoryHub::new();
        let handler = Arc::new(EchoHandler);
        hub.register("memory://echo", &handler).await;

        let transport = MemoryTransport::new(hub);
        let mut session = transport.open_session("memory://echo").await.unwrap();

        session.handle.send(b"hello".to_vec()).await.unwrap();
        assert_eq!(session.receiver.recv().await, Some(b"pushed".to_vec()));
        assert_eq!(session.receiver.recv().await, Some(b"hello".to_vec()));

        let TransportSession { handle, mut receiver } = session;
        drop(handle);
        assert_eq!(receiver.recv().await, None)
    }
}
