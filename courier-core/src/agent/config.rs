use crate::didcomm::sender::types::{RetryPolicy, DEFAULT_SEND_ATTEMPTS};
use crate::didcomm::transport::types::QUEUE_ENDPOINT;
use crate::identity::connection::types::HandshakeConfig;
use crate::routing::mediator::types::MediatorConfig;
use crate::routing::pickup::types::PickupConfig;

/// `AgentConfig` holds every setting of a single agent instance
///
/// An agent without `endpoints` is only reachable through a mediator or a return route.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub label: String,
    pub endpoints: Vec<String>,
    pub connection_image_url: Option<String>,
    pub auto_accept_connections: bool,
    pub auto_accept_mediation_requests: bool,
    pub mediator_invitation_url: Option<String>,
    pub pickup: PickupConfig,
    pub send_retry_attempts: u32,
}

impl AgentConfig {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            endpoints: Vec::new(),
            connection_image_url: None,
            auto_accept_connections: true,
            auto_accept_mediation_requests: true,
            mediator_invitation_url: None,
            pickup: PickupConfig::default(),
            send_retry_attempts: DEFAULT_SEND_ATTEMPTS,
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_mediator_invitation_url(mut self, url: &str) -> Self {
        self.mediator_invitation_url = Some(url.to_string());
        self
    }

    pub fn with_pickup(mut self, pickup: PickupConfig) -> Self {
        self.pickup = pickup;
        self
    }

    pub fn handshake(&self) -> HandshakeConfig {
        HandshakeConfig {
            label: self.label.clone(),
            image_url: self.connection_image_url.clone(),
            auto_accept_connections: self.auto_accept_connections,
        }
    }

    /// `retry_policy` reuses the reconnection intervals for the outbound retries
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.send_retry_attempts,
            base: self.pickup.base_reconnection_interval,
            cap: self.pickup.maximum_reconnection_interval,
        }
    }

    /// `mediator` publishes the first endpoint in the grants, an agent without endpoints can
    /// only mediate over return routes
    pub fn mediator(&self) -> MediatorConfig {
        MediatorConfig {
            auto_accept_mediation_requests: self.auto_accept_mediation_requests,
            endpoint: self
                .endpoints
                .first()
                .cloned()
                .unwrap_or_else(|| QUEUE_ENDPOINT.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_mediator_endpoint() {
        let config = AgentConfig::new("mediator");
        assert_eq!(config.mediator().endpoint, QUEUE_ENDPOINT);

        let config = config.with_endpoints(vec![
            "http://localhost:8080".to_string(),
            "ws://localhost:8081".to_string(),
        ]);
        assert_eq!(config.mediator().endpoint, "http://localhost:8080")
    }

    #[test]
    fn test_retry_policy_follows_pickup_intervals() {
        let mut pickup = PickupConfig::default();
        pickup.maximum_reconnection_interval = Some(Duration::from_secs(10));

        let config = AgentConfig::new("agent").with_pickup(pickup);
        let policy = config.retry_policy();

        assert_eq!(policy.attempts, DEFAULT_SEND_ATTEMPTS);
        assert_eq!(policy.base, Duration::from_millis(100));
        assert_eq!(policy.cap, Some(Duration::from_secs(10)))
    }
}
