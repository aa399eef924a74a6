use std::fmt;

use super::types::{MessageError, DIDCOMM_PREFIX, LEGACY_DIDCOMM_PREFIX};

/// `MessageType` is the parsed form of a versioned message type URI
///
/// ```text
/// https://didcomm.org/didexchange/1.1/request
/// <------ doc uri ---><protocol> <ver> <name>
/// ```
///
/// Two message types are compatible when they share the documentation URI, the protocol name,
/// the major version and the message name. Minor versions are allowed to differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageType {
    doc_uri: String,
    protocol: String,
    major: u32,
    minor: u32,
    name: String,
}

impl MessageType {
    pub fn parse(uri: &str) -> Result<Self, MessageError> {
        let normalized = match uri.strip_prefix(LEGACY_DIDCOMM_PREFIX) {
            Some(rest) => format!("{}{}", DIDCOMM_PREFIX, rest),
            None => uri.to_string(),
        };

        let mut parts = normalized.rsplitn(4, '/');
        let name = parts.next().filter(|val| !val.is_empty());
        let version = parts.next();
        let protocol = parts.next().filter(|val| !val.is_empty());
        let doc_uri = parts.next().filter(|val| !val.is_empty());

        match (doc_uri, protocol, version, name) {
            (Some(doc_uri), Some(protocol), Some(version), Some(name)) => {
                let (major, minor) = Self::parse_version(version)
                    .ok_or(MessageError::InvalidMessageType(uri.to_string()))?;

                Ok(Self {
                    doc_uri: format!("{}/", doc_uri),
                    protocol: protocol.to_string(),
                    major,
                    minor,
                    name: name.to_string(),
                })
            }
            _ => Err(MessageError::InvalidMessageType(uri.to_string())),
        }
    }

    fn parse_version(version: &str) -> Option<(u32, u32)> {
        let (major, minor) = version.split_once('.')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    }

    /// `registry_key` is the identity used by the dispatcher, it ignores the minor version
    pub fn registry_key(&self) -> String {
        format!("{}{}/{}/{}", self.doc_uri, self.protocol, self.major, self.name)
    }

    pub fn protocol_uri(&self) -> String {
        format!(
            "{}{}/{}.{}",
            self.doc_uri, self.protocol, self.major, self.minor
        )
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_compatible(&self, other: &MessageType) -> bool {
        self.registry_key() == other.registry_key()
    }

    pub fn is_protocol(&self, protocol: &str) -> bool {
        self.protocol == protocol
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol_uri(), self.name)
    }
}
