use std::collections::HashMap;
use std::sync::Arc;

use rst_common::with_tokio::tokio::sync::{mpsc, RwLock};

use super::types::{SessionId, TransportError};

/// `SessionHandle` is the sending half of a duplex session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    sender: mpsc::Sender<Vec<u8>>,
}

impl SessionHandle {
    pub fn new(id: SessionId, sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self { id, sender }
    }

    pub fn id(&self) -> SessionId {
        self.id.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| TransportError::SessionClosed(self.id.as_str().to_string()))
    }
}

/// `TransportSession` is what the opening side of a session owns: a handle to push frames and
/// the receiver of every frame pushed back by the remote side. The receiver yields `None`
/// once the remote side ends the session.
#[derive(Debug)]
pub struct TransportSession {
    pub handle: SessionHandle,
    pub receiver: mpsc::Receiver<Vec<u8>>,
}

/// `InboundFrame` is a received envelope waiting in the agent inbound queue, with the session
/// it arrived on if any
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub payload: Vec<u8>,
    pub session: Option<SessionHandle>,
}

impl InboundFrame {
    pub fn new(payload: Vec<u8>, session: Option<SessionHandle>) -> Self {
        Self { payload, session }
    }
}

/// `SessionRegistry` keeps the open inbound sessions indexed by connection id
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection_id: &str, handle: SessionHandle) {
        self.sessions
            .write()
            .await
            .insert(connection_id.to_string(), handle);
    }

    /// `find` only returns sessions which are still open, closed ones are evicted
    pub async fn find(&self, connection_id: &str) -> Option<SessionHandle> {
        let handle = self.sessions.read().await.get(connection_id).cloned()?;
        if handle.is_closed() {
            self.remove(connection_id).await;
            return None;
        }

        Some(handle)
    }

    pub async fn remove(&self, connection_id: &str) {
        self.sessions.write().await.remove(connection_id);
    }

    pub async fn remove_session(&self, session_id: &SessionId) {
        self.sessions
            .write()
            .await
            .retain(|_, handle| &handle.id != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rst_common::with_tokio::tokio;

    #[tokio::test]
    async fn test_find_evicts_closed_sessions() {
        let registry = SessionRegistry::new();

        let (tx, rx) = mpsc::channel(4);
        let handle = SessionHandle::new(SessionId::generate(), tx);
        registry.register("conn-1", handle.clone()).await;

        assert!(registry.find("conn-1").await.is_some());

        drop(rx);
        assert!(registry.find("conn-1").await.is_none());

        let result = handle.send(b"frame".to_vec()).await;
        assert!(matches!(
            result.unwrap_err(),
            TransportError::SessionClosed(_)
        ))
    }

    #[tokio::test]
    async fn test_remove_session_by_id() {
        let registry = SessionRegistry::new();

        let (tx, _rx) = mpsc::channel(4);
        let handle = SessionHandle::new(SessionId::generate(), tx);
        registry.register("conn-1", handle.clone()).await;
        registry.register("conn-2", handle.clone()).await;

        registry.remove_session(&handle.id()).await;
        assert!(registry.find("conn-1").await.is_none());
        assert!(registry.find("conn-2").await.is_none())
    }
}
