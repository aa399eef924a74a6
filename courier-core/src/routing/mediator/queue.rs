use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rst_common::standard::async_trait::async_trait;
use rst_common::with_tokio::tokio::sync::Mutex;

use super::types::{MediatorError, MessageQueue, QueuedMessage};

/// `InMemoryQueue` is the default [`MessageQueue`], messages are lost on restart
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    messages: Arc<Mutex<HashMap<String, VecDeque<QueuedMessage>>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn add(&self, message: QueuedMessage) -> Result<(), MediatorError> {
        let mut messages = self.messages.lock().await;
        messages
            .entry(message.connection_id.clone())
            .or_default()
            .push_back(message);

        Ok(())
    }

    async fn count(&self, connection_id: &str) -> Result<usize, MediatorError> {
        let messages = self.messages.lock().await;
        Ok(messages.get(connection_id).map(|queue| queue.len()).unwrap_or(0))
    }

    async fn peek(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<QueuedMessage>, MediatorError> {
        let messages = self.messages.lock().await;
        Ok(messages
            .get(connection_id)
            .map(|queue| queue.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn take(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<QueuedMessage>, MediatorError> {
        let mut messages = self.messages.lock().await;
        let queue = match messages.get_mut(connection_id) {
            Some(queue) => queue,
            None => return Ok(Vec::new()),
        };

        let size = limit.min(queue.len());
        Ok(queue.drain(..size).collect())
    }

    async fn remove(&self, connection_id: &str, ids: &[String]) -> Result<usize, MediatorError> {
        let mut messages = self.messages.lock().await;
        let queue = match messages.get_mut(connection_id) {
            Some(queue) => queue,
            None => return Ok(0),
        };

        let before = queue.len();
        queue.retain(|message| !ids.contains(&message.id));
        Ok(before - queue.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rst_common::standard::chrono::Utc;
    use rst_common::standard::serde_json::{self, json};
    use rst_common::with_tokio::tokio;

    fn message(id: &str, connection_id: &str) -> QueuedMessage {
        QueuedMessage {
            id: id.to_string(),
            connection_id: connection_id.to_string(),
            recipient_key: "key-1".to_string(),
            encrypted_message: serde_json::from_value(json!({
                "protected": "e30",
                "iv": "aXY",
                "ciphertext": "Y2lwaGVy",
                "tag": "dGFn"
            }))
            .unwrap(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_peek_keeps_messages() {
        let queue = InMemoryQueue::new();
        for idx in 0..5 {
            queue.add(message(&format!("msg-{}", idx), "conn-1")).await.unwrap();
        }

        let peeked = queue.peek("conn-1", 2).await.unwrap();
        assert_eq!(
            peeked.iter().map(|msg| msg.id.clone()).collect::<Vec<String>>(),
            vec!["msg-0".to_string(), "msg-1".to_string()]
        );
        assert_eq!(queue.count("conn-1").await.unwrap(), 5);
        assert_eq!(queue.count("conn-2").await.unwrap(), 0)
    }

    #[tokio::test]
    async fn test_take_and_remove() {
        let queue = InMemoryQueue::new();
        for idx in 0..5 {
            queue.add(message(&format!("msg-{}", idx), "conn-1")).await.unwrap();
        }

        let taken = queue.take("conn-1", 2).await.unwrap();
        assert_eq!(taken.len(), 2);
        assert_eq!(queue.count("conn-1").await.unwrap(), 3);

        let removed = queue
            .remove("conn-1", &["msg-3".to_string(), "msg-0".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(queue.count("conn-1").await.unwrap(), 2);

        assert!(queue.take("conn-2", 10).await.unwrap().is_empty())
    }
}
