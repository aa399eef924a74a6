use std::sync::Arc;

use super::types::{scheme_of, OutboundTransport, SessionTransport, TransportError};

/// `TransportRegistry` selects the transport able to reach an endpoint, based on its scheme
#[derive(Clone, Default)]
pub struct TransportRegistry {
    outbound: Vec<Arc<dyn OutboundTransport>>,
    sessions: Vec<Arc<dyn SessionTransport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outbound(mut self, transport: Arc<dyn OutboundTransport>) -> Self {
        self.outbound.push(transport);
        self
    }

    pub fn with_session(mut self, transport: Arc<dyn SessionTransport>) -> Self {
        self.sessions.push(transport);
        self
    }

    pub fn outbound_for(
        &self,
        endpoint: &str,
    ) -> Result<Arc<dyn OutboundTransport>, TransportError> {
        let scheme = scheme_of(endpoint)
            .ok_or(TransportError::UnsupportedScheme(endpoint.to_string()))?;

        self.outbound
            .iter()
            .find(|transport| transport.supported_schemes().iter().any(|val| val == scheme))
            .cloned()
            .ok_or(TransportError::UnsupportedScheme(scheme.to_string()))
    }

    pub fn session_for(
        &self,
        endpoint: &str,
    ) -> Result<Arc<dyn SessionTransport>, TransportError> {
        let scheme = scheme_of(endpoint)
            .ok_or(TransportError::UnsupportedScheme(endpoint.to_string()))?;

        self.sessions
            .iter()
            .find(|transport| transport.supported_schemes().iter().any(|val| val == scheme))
            .cloned()
            .ok_or(TransportError::UnsupportedScheme(scheme.to_string()))
    }

    /// `is_reachable` tells whether an outbound transport exists for the endpoint
    pub fn is_reachable(&self, endpoint: &str) -> bool {
        self.outbound_for(endpoint).is_ok()
    }
}
