use rst_common::standard::async_trait::async_trait;
use rst_common::with_logging::log::debug;

use reqwest::{header::CONTENT_TYPE, Client, StatusCode};

use prople_courier_core::didcomm::transport::types::{OutboundTransport, TransportError};

pub const DIDCOMM_CONTENT_TYPE: &str = "application/didcomm-envelope-enc";

/// `HttpTransport` posts each envelope to the endpoint as a single request
///
/// A non empty response body is a reply sent back over the return route.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn request_error(err: reqwest::Error) -> TransportError {
        if err.is_connect() || err.is_timeout() {
            return TransportError::Transient(err.to_string());
        }

        TransportError::Fatal(err.to_string())
    }

    fn status_error(status: StatusCode) -> TransportError {
        if status.is_server_error() {
            return TransportError::Transient(format!("http status: {}", status));
        }

        TransportError::Fatal(format!("http status: {}", status))
    }
}

#[async_trait]
impl OutboundTransport for HttpTransport {
    fn supported_schemes(&self) -> Vec<String> {
        vec!["http".to_string(), "https".to_string()]
    }

    async fn send(
        &self,
        endpoint: &str,
        payload: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, DIDCOMM_CONTENT_TYPE)
            .body(payload)
            .send()
            .await
            .map_err(Self::request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status));
        }

        let body = response.bytes().await.map_err(Self::request_error)?;
        debug!("envelope posted to {}: {}", endpoint, status);

        if body.is_empty() {
            return Ok(None);
        }

        Ok(Some(body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mockito::{Matcher, Server};
    use rst_common::with_tokio::tokio;

    #[tokio::test]
    async fn test_send_without_reply() {
        let mut server = Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("POST", "/")
            .match_header("content-type", DIDCOMM_CONTENT_TYPE)
            .match_body(Matcher::Exact("envelope".to_string()))
            .with_status(202)
            .create_async()
            .await;

        let transport = HttpTransport::default();
        let reply = transport
            .send(&format!("{}/", url), b"envelope".to_vec())
            .await;

        mock.assert();
        assert_eq!(reply, Ok(None))
    }

    #[tokio::test]
    async fn test_send_with_return_route_reply() {
        let mut server = Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("POST", "/inbound")
            .with_status(200)
            .with_header("content-type", DIDCOMM_CONTENT_TYPE)
            .with_body("reply")
            .create_async()
            .await;

        let transport = HttpTransport::default();
        let reply = transport
            .send(&format!("{}/inbound", url), b"envelope".to_vec())
            .await;

        mock.assert();
        assert_eq!(reply, Ok(Some(b"reply".to_vec())))
    }

    #[tokio::test]
    async fn test_send_status_errors() {
        let mut server = Server::new_async().await;
        let url = server.url();

        let unavailable = server
            .mock("POST", "/unavailable")
            .with_status(500)
            .create_async()
            .await;

        let rejected = server
            .mock("POST", "/rejected")
            .with_status(400)
            .create_async()
            .await;

        let transport = HttpTransport::default();

        let result = transport
            .send(&format!("{}/unavailable", url), b"envelope".to_vec())
            .await;
        unavailable.assert();
        assert!(matches!(result, Err(TransportError::Transient(_))));

        let result = transport
            .send(&format!("{}/rejected", url), b"envelope".to_vec())
            .await;
        rejected.assert();
        assert!(matches!(result, Err(TransportError::Fatal(_))))
    }

    #[tokio::test]
    async fn test_send_unreachable_endpoint() {
        let transport = HttpTransport::default();
        let result = transport
            .send("http://127.0.0.1:1/", b"envelope".to_vec())
            .await;

        assert!(matches!(result, Err(TransportError::Transient(_))))
    }
}
