use std::collections::HashMap;

use rst_common::standard::chrono::serde::ts_seconds;
use rst_common::standard::chrono::{DateTime, Utc};
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;
use rst_common::standard::uuid::Uuid;

use rstdev_domain::entity::ToJSON;
use rstdev_domain::BaseError;

use crate::didcomm::message::AgentMessage;
use crate::storage::types::{Record, Tags};

use super::messages::OutOfBandInvitation;
use super::types::{OobRole, OobState, OutOfBandError};

/// `OutOfBandRecord` keeps an invitation, created by us or received from a peer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct OutOfBandRecord {
    pub id: String,
    pub role: OobRole,
    pub state: OobState,
    pub invitation: OutOfBandInvitation,
    pub reusable: bool,
    pub auto_accept_connection: bool,
    pub mediator_id: Option<String>,

    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "ts_seconds")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub version: u64,
}

impl OutOfBandRecord {
    pub fn new(
        role: OobRole,
        state: OobState,
        invitation: OutOfBandInvitation,
        reusable: bool,
        auto_accept_connection: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            state,
            invitation,
            reusable,
            auto_accept_connection,
            mediator_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn invitation_id(&self) -> String {
        self.invitation.id()
    }

    pub fn assert_role(&self, expected: OobRole) -> Result<(), OutOfBandError> {
        if self.role != expected {
            return Err(OutOfBandError::InvalidState(format!(
                "out of band {} has role {}, expected {}",
                self.id,
                self.role.as_str(),
                expected.as_str()
            )));
        }

        Ok(())
    }

    pub fn set_state(&mut self, state: OobState) -> Result<OobState, OutOfBandError> {
        if !self.state.can_move_to(state) {
            return Err(OutOfBandError::InvalidState(format!(
                "out of band {} cannot move from {} to {}",
                self.id, self.state, state
            )));
        }

        let previous = self.state;
        self.state = state;
        self.updated_at = Utc::now();
        Ok(previous)
    }

    /// `reopen` hands a claimed receiver invitation back to `PrepareResponse` when the request
    /// built for it never left this agent
    pub fn reopen(&mut self) -> Result<OobState, OutOfBandError> {
        if self.role != OobRole::Receiver || self.state != OobState::Connected {
            return Err(OutOfBandError::InvalidState(format!(
                "out of band {} cannot be reopened from {}",
                self.id, self.state
            )));
        }

        let previous = self.state;
        self.state = OobState::PrepareResponse;
        self.updated_at = Utc::now();
        Ok(previous)
    }
}

impl Record for OutOfBandRecord {
    const RECORD_TYPE: &'static str = "out_of_band";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert("invitation_id".to_string(), self.invitation_id());
        tags.insert("role".to_string(), self.role.as_str().to_string());
        tags.insert("state".to_string(), self.state.as_str().to_string());

        if let Some(key) = self.invitation.invitation_key() {
            tags.insert("invitation_key".to_string(), key);
        }

        if let Some(mediator_id) = self.mediator_id.as_ref() {
            tags.insert("mediator_id".to_string(), mediator_id.clone());
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

impl ToJSON for OutOfBandRecord {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(&self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identity::connection::types::HandshakeProtocol;
    use crate::identity::oob::messages::InlineService;

    const VERKEY: &str = "8HH5gYEeNc3z7PYXmd54d4x6qAfCNrqQqEB3nS7Zfu7K";

    #[test]
    fn test_record_tags() {
        let service = InlineService::new("#inline", VERKEY, &[], "memory://alice").unwrap();
        let invitation =
            OutOfBandInvitation::new("alice", &[HandshakeProtocol::DidExchange], vec![service]);

        let record = OutOfBandRecord::new(
            OobRole::Sender,
            OobState::AwaitResponse,
            invitation.clone(),
            false,
            true,
        );

        let tags = record.tags();
        assert_eq!(tags.get("invitation_id"), Some(&invitation.id()));
        assert_eq!(tags.get("invitation_key"), Some(&VERKEY.to_string()));
        assert_eq!(tags.get("state"), Some(&"await-response".to_string()));
        assert_eq!(tags.get("role"), Some(&"sender".to_string()))
    }

    #[test]
    fn test_set_state_forward_only() {
        let service = InlineService::new("#inline", VERKEY, &[], "memory://alice").unwrap();
        let invitation =
            OutOfBandInvitation::new("alice", &[HandshakeProtocol::DidExchange], vec![service]);

        let mut record = OutOfBandRecord::new(
            OobRole::Receiver,
            OobState::PrepareResponse,
            invitation,
            false,
            true,
        );

        assert_eq!(
            record.set_state(OobState::Connected).unwrap(),
            OobState::PrepareResponse
        );
        assert!(matches!(
            record.set_state(OobState::PrepareResponse).unwrap_err(),
            OutOfBandError::InvalidState(_)
        ))
    }

    #[test]
    fn test_reopen_claimed_receiver() {
        let service = InlineService::new("#inline", VERKEY, &[], "memory://alice").unwrap();
        let invitation =
            OutOfBandInvitation::new("alice", &[HandshakeProtocol::DidExchange], vec![service]);

        let mut record = OutOfBandRecord::new(
            OobRole::Receiver,
            OobState::PrepareResponse,
            invitation.clone(),
            false,
            true,
        );
        assert!(record.reopen().is_err());

        record.set_state(OobState::Connected).unwrap();
        assert_eq!(record.reopen().unwrap(), OobState::Connected);
        assert_eq!(record.state, OobState::PrepareResponse);

        let mut sender =
            OutOfBandRecord::new(OobRole::Sender, OobState::AwaitResponse, invitation, false, true);
        sender.set_state(OobState::Done).unwrap();
        assert!(matches!(
            sender.reopen().unwrap_err(),
            OutOfBandError::InvalidState(_)
        ))
    }
}
