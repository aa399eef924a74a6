use std::sync::Arc;

use rst_common::with_http_tokio::axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use rst_common::with_logging::log::warn;

use prople_courier_core::didcomm::transport::types::{InboundHandler, TransportError};

use super::http::DIDCOMM_CONTENT_TYPE;

/// `inbound_router` accepts envelopes posted to `/`
///
/// A reply produced through the return route is written in the response body, otherwise
/// the request is answered with `202 Accepted`.
pub fn inbound_router(handler: Arc<dyn InboundHandler>) -> Router {
    Router::new().route("/", post(receive)).with_state(handler)
}

async fn receive(State(handler): State<Arc<dyn InboundHandler>>, body: Bytes) -> Response {
    match handler.handle(body.to_vec(), None).await {
        Ok(Some(reply)) => (
            StatusCode::OK,
            [(CONTENT_TYPE, DIDCOMM_CONTENT_TYPE)],
            reply,
        )
            .into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(TransportError::Transient(msg)) => {
            warn!("inbound envelope deferred: {}", msg);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        Err(err) => {
            warn!("inbound envelope rejected: {}", err);
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mockall::mock;

    use rst_common::standard::async_trait::async_trait;
    use rst_common::with_http_tokio::axum::body::to_bytes;
    use rst_common::with_tokio::tokio;

    use prople_courier_core::didcomm::transport::SessionHandle;

    mock!(
        FakeHandler{}

        #[async_trait]
        impl InboundHandler for FakeHandler {
            async fn handle(
                &self,
                payload: Vec<u8>,
                session: Option<SessionHandle>,
            ) -> Result<Option<Vec<u8>>, TransportError>;
        }
    );

    fn handler(
        result: Result<Option<Vec<u8>>, TransportError>,
    ) -> State<Arc<dyn InboundHandler>> {
        let mut handler = MockFakeHandler::new();
        handler
            .expect_handle()
            .withf(|payload, session| payload == b"envelope" && session.is_none())
            .times(1)
            .return_once(move |_, _| result);

        State(Arc::new(handler))
    }

    #[tokio::test]
    async fn test_receive_with_reply() {
        let response = receive(
            handler(Ok(Some(b"reply".to_vec()))),
            Bytes::from_static(b"envelope"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            DIDCOMM_CONTENT_TYPE
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.to_vec(), b"reply".to_vec())
    }

    #[tokio::test]
    async fn test_receive_without_reply() {
        let response = receive(handler(Ok(None)), Bytes::from_static(b"envelope")).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED)
    }

    #[tokio::test]
    async fn test_receive_errors() {
        let response = receive(
            handler(Err(TransportError::Transient("busy".to_string()))),
            Bytes::from_static(b"envelope"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = receive(
            handler(Err(TransportError::Fatal("unpack failed".to_string()))),
            Bytes::from_static(b"envelope"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST)
    }
}
