use rst_common::standard::chrono::serde::ts_seconds;
use rst_common::standard::chrono::{DateTime, Utc};
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;
use rst_common::standard::uuid::Uuid;

use rstdev_domain::entity::ToJSON;
use rstdev_domain::BaseError;

use crate::routing::pickup::types::PickupStrategy;
use crate::storage::types::{Record, Tags};

use super::types::{MediationError, MediationRole, MediationState};

const RECIPIENT_KEY_TAG: &str = "recipient_key";

/// `recipient_key_tag` is the tag set for every key registered with a mediation, it lets the
/// mediator find the owner of a forward message with a single query
pub fn recipient_key_tag(verkey: &str) -> String {
    format!("{}:{}", RECIPIENT_KEY_TAG, verkey)
}

/// `MediationRecord` is shared by both roles, a mediator keeps one per recipient and a
/// recipient one per mediator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct MediationRecord {
    pub id: String,
    pub role: MediationRole,
    pub state: MediationState,
    pub connection_id: String,
    pub thread_id: String,
    pub endpoint: Option<String>,

    #[serde(default)]
    pub routing_keys: Vec<String>,

    #[serde(default)]
    pub recipient_keys: Vec<String>,

    #[serde(default)]
    pub default: bool,

    pub pickup_strategy: Option<PickupStrategy>,

    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "ts_seconds")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub version: u64,
}

impl MediationRecord {
    pub fn new(
        role: MediationRole,
        state: MediationState,
        connection_id: &str,
        thread_id: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            state,
            connection_id: connection_id.to_string(),
            thread_id: thread_id.to_string(),
            endpoint: None,
            routing_keys: Vec::new(),
            recipient_keys: Vec::new(),
            default: false,
            pickup_strategy: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_granted(&self) -> bool {
        self.state == MediationState::Granted
    }

    pub fn assert_state(&self, expected: MediationState) -> Result<(), MediationError> {
        if self.state != expected {
            return Err(MediationError::InvalidState(format!(
                "mediation {} is {}, expected {}",
                self.id, self.state, expected
            )));
        }

        Ok(())
    }

    pub fn assert_role(&self, expected: MediationRole) -> Result<(), MediationError> {
        if self.role != expected {
            return Err(MediationError::InvalidState(format!(
                "mediation {} has role {}, expected {}",
                self.id,
                self.role.as_str(),
                expected.as_str()
            )));
        }

        Ok(())
    }

    pub fn set_state(&mut self, state: MediationState) -> Result<MediationState, MediationError> {
        if !self.state.can_move_to(state) {
            return Err(MediationError::InvalidState(format!(
                "mediation {} cannot move from {} to {}",
                self.id, self.state, state
            )));
        }

        let previous = self.state;
        self.state = state;
        self.updated_at = Utc::now();
        Ok(previous)
    }

    /// `add_recipient_key` gives `false` when the key was already registered
    pub fn add_recipient_key(&mut self, verkey: &str) -> bool {
        if self.recipient_keys.iter().any(|key| key == verkey) {
            return false;
        }

        self.recipient_keys.push(verkey.to_string());
        self.updated_at = Utc::now();
        true
    }

    pub fn remove_recipient_key(&mut self, verkey: &str) -> bool {
        let before = self.recipient_keys.len();
        self.recipient_keys.retain(|key| key != verkey);

        let removed = before != self.recipient_keys.len();
        if removed {
            self.updated_at = Utc::now();
        }

        removed
    }
}

impl Record for MediationRecord {
    const RECORD_TYPE: &'static str = "mediation";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert("role".to_string(), self.role.as_str().to_string());
        tags.insert("state".to_string(), self.state.as_str().to_string());
        tags.insert("connection_id".to_string(), self.connection_id.clone());
        tags.insert("thread_id".to_string(), self.thread_id.clone());
        tags.insert("default".to_string(), self.default.to_string());

        for key in self.recipient_keys.iter() {
            tags.insert(recipient_key_tag(key), "true".to_string());
        }

        tags
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version
    }
}

impl ToJSON for MediationRecord {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(&self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}
