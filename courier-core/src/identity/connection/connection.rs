use std::collections::HashMap;

use rst_common::standard::chrono::serde::ts_seconds;
use rst_common::standard::chrono::{DateTime, Utc};
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;
use rst_common::standard::uuid::Uuid;

use rstdev_domain::entity::ToJSON;
use rstdev_domain::BaseError;

use crate::identity::did::types::DidDoc;
use crate::storage::types::{Record, Tags};

use super::types::{ConnectionError, ConnectionRole, ConnectionState, HandshakeProtocol};

/// `ConnectionRecord` is the persisted state of one handshake and the relationship it creates
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct ConnectionRecord {
    pub id: String,
    pub did: String,
    pub did_doc: DidDoc,
    pub their_did: Option<String>,
    pub their_doc: Option<DidDoc>,
    pub their_label: Option<String>,
    pub out_of_band_id: Option<String>,
    pub invitation_key: Option<String>,
    pub protocol: HandshakeProtocol,
    pub role: ConnectionRole,
    pub state: ConnectionState,
    pub thread_id: String,
    pub parent_thread_id: Option<String>,
    pub multi_use_invitation: bool,
    pub auto_accept_connection: bool,
    pub error_message: Option<String>,

    #[serde(default)]
    pub tags: HashMap<String, String>,

    #[serde(with = "ts_seconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "ts_seconds")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub version: u64,
}

impl ConnectionRecord {
    pub fn new(
        role: ConnectionRole,
        protocol: HandshakeProtocol,
        state: ConnectionState,
        did: String,
        did_doc: DidDoc,
        thread_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            did,
            did_doc,
            their_did: None,
            their_doc: None,
            their_label: None,
            out_of_band_id: None,
            invitation_key: None,
            protocol,
            role,
            state,
            thread_id,
            parent_thread_id: None,
            multi_use_invitation: false,
            auto_accept_connection: false,
            error_message: None,
            tags: HashMap::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// `thread_scoped_id` derives the record id from the handshake thread, a second record for
    /// the same thread and role collides on insert
    pub fn thread_scoped_id(role: ConnectionRole, thread_id: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(role.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(thread_id.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    pub fn with_thread_scoped_id(mut self) -> Self {
        self.id = Self::thread_scoped_id(self.role, &self.thread_id);
        self
    }

    /// `verkey` is our own key used for this connection
    pub fn verkey(&self) -> Option<String> {
        self.did_doc.verkey()
    }

    pub fn their_verkey(&self) -> Option<String> {
        self.their_doc.as_ref().and_then(|doc| doc.verkey())
    }

    /// `is_ready` is true once application messages can flow over the connection
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Responded | ConnectionState::Complete
        )
    }

    pub fn assert_state(&self, expected: &[ConnectionState]) -> Result<(), ConnectionError> {
        if !expected.contains(&self.state) {
            return Err(ConnectionError::InvalidState(format!(
                "connection {} is {}, expected one of {:?}",
                self.id, self.state, expected
            )));
        }

        Ok(())
    }

    pub fn assert_role(&self, expected: ConnectionRole) -> Result<(), ConnectionError> {
        if self.role != expected {
            return Err(ConnectionError::InvalidState(format!(
                "connection {} has role {}, expected {}",
                self.id,
                self.role.as_str(),
                expected.as_str()
            )));
        }

        Ok(())
    }

    /// `set_state` moves the record forward and returns the previous state
    pub fn set_state(&mut self, state: ConnectionState) -> Result<ConnectionState, ConnectionError> {
        if !self.state.can_move_to(state) {
            return Err(ConnectionError::InvalidState(format!(
                "connection {} cannot move from {} to {}",
                self.id, self.state, state
            )));
        }

        let previous = self.state;
        self.state = state;
        self.updated_at = Utc::now();
        Ok(previous)
    }

    pub fn set_tag(&mut self, name: &str, value: &str) {
        self.tags.insert(name.to_string(), value.to_string());
    }

    pub fn get_tag(&self, name: &str) -> Option<String> {
        self.tags.get(name).cloned()
    }
}

impl Record for ConnectionRecord {
    const RECORD_TYPE: &'static str = "connection";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn tags(&self) -> Tags {
        let mut tags = self.tags.clone();
        tags.insert("thread_id".to_string(), self.thread_id.clone());
        tags.insert("state".to_string(), self.state.as_str().to_string());
        tags.insert("role".to_string(), self.role.as_str().to_string());

        if let Some(verkey) = self.verkey() {
            tags.insert("verkey".to_string(), verkey);
        }

        if let Some(their_key) = self.their_verkey() {
            tags.insert("their_key".to_string(), their_key);
        }

        if let Some(their_did) = self.their_did.as_ref() {
            tags.insert("their_did".to_string(), their_did.clone());
        }

        if let Some(oob_id) = self.out_of_band_id.as_ref() {
            tags.insert("out_of_band_id".to_string(), oob_id.clone());
        }

        if let Some(invitation_key) = self.invitation_key.as_ref() {
            tags.insert("invitation_key".to_string(), invitation_key.clone());
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

impl ToJSON for ConnectionRecord {
    fn to_json(&self) -> Result<String, BaseError> {
        serde_json::to_string(&self).map_err(|err| BaseError::ToJSONError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_record(state: ConnectionState) -> ConnectionRecord {
        let doc = DidDoc::new("did-1", "verkey-1", &["memory://a".to_string()], &[]);
        ConnectionRecord::new(
            ConnectionRole::Requester,
            HandshakeProtocol::DidExchange,
            state,
            "did-1".to_string(),
            doc,
            "thread-1".to_string(),
        )
    }

    #[test]
    fn test_set_state_is_monotonic() {
        let mut record = build_record(ConnectionState::Start);

        assert_eq!(
            record.set_state(ConnectionState::Requested).unwrap(),
            ConnectionState::Start
        );
        assert!(record.set_state(ConnectionState::Start).is_err());
        assert!(record.set_state(ConnectionState::Requested).is_err());

        record.set_state(ConnectionState::Complete).unwrap();
        let result = record.set_state(ConnectionState::Abandoned);
        assert!(matches!(
            result.unwrap_err(),
            ConnectionError::InvalidState(_)
        ));
        assert_eq!(record.state, ConnectionState::Complete)
    }

    #[test]
    fn test_tags_include_user_tags() {
        let mut record = build_record(ConnectionState::Requested);
        record.set_tag("alias", "bob");
        record.invitation_key = Some("invitation".to_string());

        let tags = record.tags();
        assert_eq!(tags.get("alias"), Some(&"bob".to_string()));
        assert_eq!(tags.get("state"), Some(&"requested".to_string()));
        assert_eq!(tags.get("verkey"), Some(&"verkey-1".to_string()));
        assert_eq!(tags.get("invitation_key"), Some(&"invitation".to_string()));
        assert!(tags.get("their_key").is_none());
        assert_eq!(record.get_tag("alias"), Some("bob".to_string()))
    }

    #[test]
    fn test_thread_scoped_id() {
        let record = build_record(ConnectionState::Requested).with_thread_scoped_id();
        let again = build_record(ConnectionState::Requested).with_thread_scoped_id();
        assert_eq!(record.id, again.id);
        assert_eq!(record.id.len(), 64);

        let responder = ConnectionRecord::thread_scoped_id(ConnectionRole::Responder, "thread-1");
        assert_ne!(record.id, responder)
    }

    #[test]
    fn test_ready_states() {
        assert!(!build_record(ConnectionState::Requested).is_ready());
        assert!(build_record(ConnectionState::Responded).is_ready());
        assert!(build_record(ConnectionState::Complete).is_ready());
        assert!(!build_record(ConnectionState::Abandoned).is_ready())
    }
}
