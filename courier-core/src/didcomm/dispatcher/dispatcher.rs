use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rst_common::with_logging::log::debug;

use crate::didcomm::context::{InboundMessageContext, OutboundMessageContext};
use crate::didcomm::message::MessageType;

use super::types::{DispatcherError, MessageHandler};

#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn MessageHandler>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `register_handler` registers all supported types of the handler or none of them
    pub fn register_handler(&self, handler: Arc<dyn MessageHandler>) -> Result<(), DispatcherError> {
        let mut keys = Vec::new();
        for type_uri in handler.supported_types() {
            let message_type = MessageType::parse(&type_uri)
                .map_err(|err| DispatcherError::InvalidMessageType(err.to_string()))?;

            keys.push((type_uri, message_type.registry_key()));
        }

        let mut handlers = self
            .handlers
            .write()
            .map_err(|err| DispatcherError::LockError(err.to_string()))?;

        for (type_uri, key) in keys.iter() {
            if handlers.contains_key(key) {
                return Err(DispatcherError::DuplicateHandler(type_uri.to_string()));
            }
        }

        for (_, key) in keys {
            handlers.insert(key, handler.clone());
        }

        Ok(())
    }

    pub fn supports(&self, message_type: &MessageType) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(&message_type.registry_key()))
            .unwrap_or(false)
    }

    pub async fn dispatch(
        &self,
        ctx: &InboundMessageContext,
    ) -> Result<Option<OutboundMessageContext>, DispatcherError> {
        let handler = {
            let handlers = self
                .handlers
                .read()
                .map_err(|err| DispatcherError::LockError(err.to_string()))?;

            if handlers.is_empty() {
                return Err(DispatcherError::NoHandlersRegistered);
            }

            handlers
                .get(&ctx.message_type.registry_key())
                .cloned()
                .ok_or(DispatcherError::UnsupportedMessageType(
                    ctx.header.type_uri.clone(),
                ))?
        };

        debug!("dispatching message: {}", ctx.message_type);
        handler
            .handle(ctx)
            .await
            .map_err(DispatcherError::HandlerError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    use rst_common::standard::async_trait::async_trait;
    use rst_common::standard::serde_json::json;
    use rst_common::with_tokio::tokio;

    use crate::didcomm::dispatcher::types::HandlerError;

    mock!(
        FakeHandler{}

        #[async_trait]
        impl MessageHandler for FakeHandler {
            fn supported_types(&self) -> Vec<String>;

            async fn handle(
                &self,
                ctx: &InboundMessageContext,
            ) -> Result<Option<OutboundMessageContext>, HandlerError>;
        }
    );

    fn handler_for(types: Vec<&str>) -> MockFakeHandler {
        let supported: Vec<String> = types.iter().map(|val| val.to_string()).collect();

        let mut handler = MockFakeHandler::new();
        handler
            .expect_supported_types()
            .returning(move || supported.clone());

        handler
    }

    fn inbound(type_uri: &str) -> InboundMessageContext {
        let message = json!({"@id": "msg-1", "@type": type_uri});
        InboundMessageContext::new(message, None, None).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_ignores_minor_version() {
        let mut handler = handler_for(vec!["https://didcomm.org/trust_ping/1.0/ping"]);
        handler.expect_handle().times(1).returning(|_| Ok(None));

        let dispatcher = Dispatcher::new();
        let registered = dispatcher.register_handler(Arc::new(handler));
        assert!(!registered.is_err());

        let result = dispatcher
            .dispatch(&inbound("https://didcomm.org/trust_ping/1.3/ping"))
            .await;
        assert!(!result.is_err())
    }

    #[tokio::test]
    async fn test_dispatch_without_handlers() {
        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .dispatch(&inbound("https://didcomm.org/trust_ping/1.0/ping"))
            .await;

        assert_eq!(result.unwrap_err(), DispatcherError::NoHandlersRegistered)
    }

    #[tokio::test]
    async fn test_dispatch_unsupported_type() {
        let handler = handler_for(vec!["https://didcomm.org/trust_ping/1.0/ping"]);
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler(Arc::new(handler)).unwrap();

        let result = dispatcher
            .dispatch(&inbound("https://didcomm.org/unknown/1.0/message"))
            .await;

        assert_eq!(
            result.unwrap_err(),
            DispatcherError::UnsupportedMessageType(
                "https://didcomm.org/unknown/1.0/message".to_string()
            )
        )
    }

    #[tokio::test]
    async fn test_dispatch_handler_error() {
        let mut handler = handler_for(vec!["https://didcomm.org/trust_ping/1.0/ping"]);
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Err(HandlerError::InvalidState("abandoned".to_string())));

        let dispatcher = Dispatcher::new();
        dispatcher.register_handler(Arc::new(handler)).unwrap();

        let result = dispatcher
            .dispatch(&inbound("https://didcomm.org/trust_ping/1.0/ping"))
            .await;

        assert_eq!(
            result.unwrap_err(),
            DispatcherError::HandlerError(HandlerError::InvalidState("abandoned".to_string()))
        )
    }

    #[test]
    fn test_register_duplicate_handler() {
        let dispatcher = Dispatcher::new();
        let first = handler_for(vec![
            "https://didcomm.org/trust_ping/1.0/ping",
            "https://didcomm.org/trust_ping/1.0/ping_response",
        ]);
        dispatcher.register_handler(Arc::new(first)).unwrap();

        let second = handler_for(vec![
            "https://didcomm.org/routing/1.0/forward",
            "https://didcomm.org/trust_ping/1.1/ping",
        ]);
        let result = dispatcher.register_handler(Arc::new(second));

        assert_eq!(
            result.unwrap_err(),
            DispatcherError::DuplicateHandler("https://didcomm.org/trust_ping/1.1/ping".to_string())
        );

        let forward = MessageType::parse("https://didcomm.org/routing/1.0/forward").unwrap();
        assert!(!dispatcher.supports(&forward))
    }
}
