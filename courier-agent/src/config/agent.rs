use std::str::FromStr;
use std::time::Duration;

use rst_common::standard::serde::{self, Deserialize};
use url::Url;

use prople_courier_core::agent::config::AgentConfig;
use prople_courier_core::didcomm::transport::types::QUEUE_ENDPOINT;
use prople_courier_core::routing::pickup::types::{PickupConfig, PickupStrategy};

use crate::common::types::{CommonError, ToValidate};

fn enabled() -> bool {
    true
}

/// `Agent` is the `[agent]` section, every optional value falls back to the core defaults
#[derive(Deserialize, Debug, Clone)]
#[serde(crate = "self::serde")]
pub struct Agent {
    pub(super) label: String,

    #[serde(default)]
    pub(super) endpoints: Vec<String>,

    #[serde(default = "enabled")]
    pub(super) auto_accept_connections: bool,

    #[serde(default = "enabled")]
    pub(super) auto_accept_mediation_requests: bool,

    pub(super) mediator_invitation_url: Option<String>,
    pub(super) mediator_pickup_strategy: Option<String>,
    pub(super) mediator_polling_interval_ms: Option<u64>,
    pub(super) maximum_message_pickup: Option<usize>,
    pub(super) base_reconnection_interval_ms: Option<u64>,
    pub(super) maximum_reconnection_interval_ms: Option<u64>,
    pub(super) send_retry_attempts: Option<u32>,
    pub(super) connection_image_url: Option<String>,
}

impl Agent {
    pub fn label(&self) -> String {
        self.label.to_owned()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.to_owned()
    }

    fn pickup_strategy(&self) -> Result<Option<PickupStrategy>, CommonError> {
        self.mediator_pickup_strategy
            .as_deref()
            .map(PickupStrategy::from_str)
            .transpose()
            .map_err(|err| {
                CommonError::ValidationError(format!(
                    "config: agent:mediator_pickup_strategy {}",
                    err
                ))
            })
    }

    fn pickup(&self) -> Result<PickupConfig, CommonError> {
        let mut pickup = PickupConfig::default();

        if let Some(strategy) = self.pickup_strategy()? {
            pickup.strategy = strategy;
        }

        if let Some(interval) = self.mediator_polling_interval_ms {
            pickup.polling_interval = Duration::from_millis(interval);
        }

        if let Some(maximum) = self.maximum_message_pickup {
            pickup.maximum_message_pickup = maximum;
        }

        if let Some(base) = self.base_reconnection_interval_ms {
            pickup.base_reconnection_interval = Duration::from_millis(base);
        }

        pickup.maximum_reconnection_interval = self
            .maximum_reconnection_interval_ms
            .map(Duration::from_millis);

        Ok(pickup)
    }

    /// `to_agent_config` builds the configuration consumed by the core agent
    pub fn to_agent_config(&self) -> Result<AgentConfig, CommonError> {
        let mut config = AgentConfig::new(&self.label)
            .with_endpoints(self.endpoints.to_owned())
            .with_pickup(self.pickup()?);

        config.auto_accept_connections = self.auto_accept_connections;
        config.auto_accept_mediation_requests = self.auto_accept_mediation_requests;
        config.mediator_invitation_url = self.mediator_invitation_url.to_owned();
        config.connection_image_url = self.connection_image_url.to_owned();

        if let Some(attempts) = self.send_retry_attempts {
            config.send_retry_attempts = attempts;
        }

        Ok(config)
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self {
            label: "".to_string(),
            endpoints: Vec::new(),
            auto_accept_connections: true,
            auto_accept_mediation_requests: true,
            mediator_invitation_url: None,
            mediator_pickup_strategy: None,
            mediator_polling_interval_ms: None,
            maximum_message_pickup: None,
            base_reconnection_interval_ms: None,
            maximum_reconnection_interval_ms: None,
            send_retry_attempts: None,
            connection_image_url: None,
        }
    }
}

impl ToValidate for Agent {
    fn validate(&self) -> Result<(), CommonError> {
        if self.label.is_empty() {
            return Err(CommonError::ValidationError(
                "config: agent:label is missing".to_string(),
            ));
        }

        if self.endpoints.is_empty() && self.mediator_invitation_url.is_none() {
            return Err(CommonError::ValidationError(
                "config: agent:endpoints is missing".to_string(),
            ));
        }

        for endpoint in self.endpoints.iter() {
            if endpoint == QUEUE_ENDPOINT {
                continue;
            }

            Url::parse(endpoint).map_err(|err| {
                CommonError::ValidationError(format!(
                    "config: agent:endpoints {} is invalid: {}",
                    endpoint, err
                ))
            })?;
        }

        if let Some(url) = self.mediator_invitation_url.as_ref() {
            Url::parse(url).map_err(|err| {
                CommonError::ValidationError(format!(
                    "config: agent:mediator_invitation_url is invalid: {}",
                    err
                ))
            })?;
        }

        if self.maximum_message_pickup == Some(0) {
            return Err(CommonError::ValidationError(
                "config: agent:maximum_message_pickup must be positive".to_string(),
            ));
        }

        if let (Some(base), Some(maximum)) = (
            self.base_reconnection_interval_ms,
            self.maximum_reconnection_interval_ms,
        ) {
            if maximum < base {
                return Err(CommonError::ValidationError(
                    "config: agent:maximum_reconnection_interval_ms is below the base interval"
                        .to_string(),
                ));
            }
        }

        _ = self.pickup_strategy()?;
        Ok(())
    }
}
