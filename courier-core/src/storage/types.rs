use std::collections::HashMap;

use rst_common::standard::async_trait::async_trait;
use rst_common::standard::serde::de::DeserializeOwned;
use rst_common::standard::serde::{self, Deserialize, Serialize};
use rst_common::standard::serde_json;
use rst_common::with_errors::thiserror::{self, Error};

pub type Tags = HashMap<String, String>;

#[derive(Debug, PartialEq, Clone, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("record duplicate: {0}")]
    RecordDuplicate(String),

    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("serialize error: {0}")]
    SerializeError(String),

    #[error("engine error: {0}")]
    EngineError(String),
}

/// `Record` is implemented by every persisted entity
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const RECORD_TYPE: &'static str;

    fn id(&self) -> String;

    /// `tags` are the indexed values used by [`Query`]
    fn tags(&self) -> Tags;

    fn version(&self) -> u64;

    fn set_version(&mut self, version: u64);
}

/// `Query` is a conjunction of tag equalities
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    tags: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, name: &str, value: &str) -> Self {
        self.tags.push((name.to_string(), value.to_string()));
        self
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        self.tags
            .iter()
            .all(|(name, value)| tags.get(name).map(|val| val == value).unwrap_or(false))
    }
}

/// `StorageEntry` is the engine level representation of a record
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "self::serde")]
pub struct StorageEntry {
    pub record_type: String,
    pub id: String,
    pub version: u64,
    pub tags: Tags,
    pub value: Vec<u8>,
}

impl StorageEntry {
    pub fn from_record<T: Record>(record: &T) -> Result<Self, StorageError> {
        let value =
            serde_json::to_vec(record).map_err(|err| StorageError::SerializeError(err.to_string()))?;

        Ok(Self {
            record_type: T::RECORD_TYPE.to_string(),
            id: record.id(),
            version: record.version(),
            tags: record.tags(),
            value,
        })
    }

    pub fn to_record<T: Record>(&self) -> Result<T, StorageError> {
        let mut record: T = serde_json::from_slice(&self.value)
            .map_err(|err| StorageError::SerializeError(err.to_string()))?;

        record.set_version(self.version);
        Ok(record)
    }
}

impl TryInto<Vec<u8>> for StorageEntry {
    type Error = StorageError;

    fn try_into(self) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(&self).map_err(|err| StorageError::SerializeError(err.to_string()))
    }
}

impl TryFrom<Vec<u8>> for StorageEntry {
    type Error = StorageError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        serde_json::from_slice(&value).map_err(|err| StorageError::SerializeError(err.to_string()))
    }
}

/// `StorageEngine` is the persistence seam. Implementations must make `insert` and `replace`
/// atomic with respect to each other.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// `insert` fails with [`StorageError::RecordDuplicate`] if the id is already used
    async fn insert(&self, entry: StorageEntry) -> Result<(), StorageError>;

    /// `replace` fails with [`StorageError::VersionConflict`] when the stored version is not
    /// `expected_version`
    async fn replace(&self, entry: StorageEntry, expected_version: u64)
        -> Result<(), StorageError>;

    async fn fetch(&self, record_type: &str, id: &str)
        -> Result<Option<StorageEntry>, StorageError>;

    async fn scan(&self, record_type: &str) -> Result<Vec<StorageEntry>, StorageError>;

    async fn remove(&self, record_type: &str, id: &str) -> Result<(), StorageError>;
}
