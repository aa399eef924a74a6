use rst_common::standard::serde::{self, Deserialize, Serialize};

use crate::didcomm::message::types::MessageError;
use crate::didcomm::message::{agent_message, AgentMessage, MessageHeader};

use super::types::{KeylistAction, KeylistResult};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct MediationRequest {
    #[serde(flatten)]
    pub header: MessageHeader,
}

agent_message!(
    MediationRequest,
    "https://didcomm.org/coordinate-mediation/1.0/mediate-request"
);

impl MediationRequest {
    pub fn new() -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
        }
    }
}

impl Default for MediationRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct MediationGrant {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub endpoint: String,

    #[serde(default)]
    pub routing_keys: Vec<String>,
}

agent_message!(
    MediationGrant,
    "https://didcomm.org/coordinate-mediation/1.0/mediate-grant",
    |message: &MediationGrant| {
        if message.header.thread.is_none() {
            return Err(MessageError::ValidationError(
                "grant: thread was missing".to_string(),
            ));
        }

        Ok(())
    }
);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct MediationDeny {
    #[serde(flatten)]
    pub header: MessageHeader,
}

agent_message!(
    MediationDeny,
    "https://didcomm.org/coordinate-mediation/1.0/mediate-deny",
    |message: &MediationDeny| {
        if message.header.thread.is_none() {
            return Err(MessageError::ValidationError(
                "deny: thread was missing".to_string(),
            ));
        }

        Ok(())
    }
);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct KeylistUpdateItem {
    pub recipient_key: String,
    pub action: KeylistAction,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct KeylistUpdate {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub updates: Vec<KeylistUpdateItem>,
}

agent_message!(
    KeylistUpdate,
    "https://didcomm.org/coordinate-mediation/1.0/keylist-update"
);

impl KeylistUpdate {
    pub fn new(updates: Vec<KeylistUpdateItem>) -> Self {
        Self {
            header: MessageHeader::new(Self::TYPE),
            updates,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct KeylistUpdated {
    pub recipient_key: String,
    pub action: KeylistAction,
    pub result: KeylistResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct KeylistUpdateResponse {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub updated: Vec<KeylistUpdated>,
}

agent_message!(
    KeylistUpdateResponse,
    "https://didcomm.org/coordinate-mediation/1.0/keylist-update-response"
);

#[cfg(test)]
mod tests {
    use super::*;
    use rst_common::standard::serde_json::json;

    #[test]
    fn test_keylist_update_wire_format() {
        let message = KeylistUpdate::new(vec![KeylistUpdateItem {
            recipient_key: "key-1".to_string(),
            action: KeylistAction::Add,
        }]);

        let value = message.to_value().unwrap();
        assert_eq!(value["updates"][0]["action"], "add");
        assert_eq!(value["updates"][0]["recipient_key"], "key-1");

        let response = KeylistUpdateResponse::from_value(&json!({
            "@id": "response-1",
            "@type": "https://didcomm.org/coordinate-mediation/1.0/keylist-update-response",
            "updated": [{"recipient_key": "key-1", "action": "add", "result": "success"}]
        }))
        .unwrap();

        assert_eq!(response.updated[0].result, KeylistResult::Success)
    }

    #[test]
    fn test_grant_requires_thread() {
        let result = MediationGrant::from_value(&json!({
            "@id": "grant-1",
            "@type": "https://didcomm.org/coordinate-mediation/1.0/mediate-grant",
            "endpoint": "memory://mediator",
            "routing_keys": []
        }));

        assert!(matches!(
            result.unwrap_err(),
            MessageError::ValidationError(_)
        ))
    }
}
