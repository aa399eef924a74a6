use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::with_errors::thiserror::{self, Error};

pub const PICKUP_V1_PROTOCOL: &str = "https://didcomm.org/messagepickup/1.0";
pub const PICKUP_V2_PROTOCOL: &str = "https://didcomm.org/messagepickup/2.0";

pub const DEFAULT_BASE_RECONNECTION_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAXIMUM_MESSAGE_PICKUP: usize = 10;

#[derive(Debug, PartialEq, Clone, Error)]
pub enum PickupError {
    #[error("invalid strategy: {0}")]
    InvalidStrategy(String),

    #[error("mediation error: {0}")]
    MediationError(String),

    #[error("send error: {0}")]
    SendError(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("message error: {0}")]
    MessageError(String),

    #[error("queue error: {0}")]
    QueueError(String),
}

/// `PickupStrategy` selects how queued messages are fetched from the mediator
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(crate = "self::serde", rename_all = "kebab-case")]
pub enum PickupStrategy {
    PickupV1,
    PickupV2,
    PickupV2LiveMode,
    None,
}

impl PickupStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickupStrategy::PickupV1 => "pickup-v1",
            PickupStrategy::PickupV2 => "pickup-v2",
            PickupStrategy::PickupV2LiveMode => "pickup-v2-live-mode",
            PickupStrategy::None => "none",
        }
    }
}

impl fmt::Display for PickupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PickupStrategy {
    type Err = PickupError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pickup-v1" => Ok(PickupStrategy::PickupV1),
            "pickup-v2" => Ok(PickupStrategy::PickupV2),
            "pickup-v2-live-mode" => Ok(PickupStrategy::PickupV2LiveMode),
            "none" => Ok(PickupStrategy::None),
            _ => Err(PickupError::InvalidStrategy(value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PickupConfig {
    pub strategy: PickupStrategy,
    pub polling_interval: Duration,
    pub maximum_message_pickup: usize,
    pub base_reconnection_interval: Duration,

    /// `None` keeps the reconnection delay growing without bound
    pub maximum_reconnection_interval: Option<Duration>,
}

impl Default for PickupConfig {
    fn default() -> Self {
        Self {
            strategy: PickupStrategy::PickupV2LiveMode,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            maximum_message_pickup: DEFAULT_MAXIMUM_MESSAGE_PICKUP,
            base_reconnection_interval: DEFAULT_BASE_RECONNECTION_INTERVAL,
            maximum_reconnection_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use table_test::table_test;

    #[test]
    fn test_parse_strategy() {
        let table = vec![
            ("pickup-v1", Ok(PickupStrategy::PickupV1)),
            ("pickup-v2", Ok(PickupStrategy::PickupV2)),
            ("pickup-v2-live-mode", Ok(PickupStrategy::PickupV2LiveMode)),
            ("none", Ok(PickupStrategy::None)),
            (
                "implicit",
                Err(PickupError::InvalidStrategy("implicit".to_string())),
            ),
        ];

        for (validator, input, expected) in table_test!(table) {
            validator
                .given(input)
                .when("parse strategy")
                .then("known names map to a strategy")
                .assert_eq(expected, PickupStrategy::from_str(input));
        }
    }
}
