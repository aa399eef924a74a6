use std::sync::Arc;

use rst_common::standard::async_trait::async_trait;
use rst_common::with_logging::log::debug;
use rst_common::with_tokio::tokio::sync::Mutex;

use rstdev_storage::engine::rocksdb::db::DB;

use prople_courier_core::storage::types::{StorageEngine, StorageEntry, StorageError};

use super::builder::INDEX_PREFIX;
use super::bucket::{Bucket, IndexOp};
use super::types::{DbError, Instruction};
use super::Runner;

fn engine_error(err: DbError) -> StorageError {
    StorageError::EngineError(err.to_string())
}

/// `RocksEngine` persists the record store entries in `RocksDB`
///
/// Reads go straight to the database. Writes of the whole engine are serialized by a single
/// async mutex which turns the version check of `replace` into a compare-and-swap.
#[derive(Clone)]
pub struct RocksEngine {
    runner: Runner<DB>,
    write: Arc<Mutex<()>>,
}

impl RocksEngine {
    pub fn new(runner: Runner<DB>) -> Self {
        Self {
            runner,
            write: Arc::new(Mutex::new(())),
        }
    }

    fn entry_key(record_type: &str, id: &str) -> String {
        format!("{}:{}", record_type, id)
    }

    fn index_key(record_type: &str) -> String {
        format!("{}{}", INDEX_PREFIX, record_type)
    }

    async fn read(&self, key: String) -> Result<Option<StorageEntry>, StorageError> {
        let value = self
            .runner
            .exec(Instruction::GetCf { key })
            .await
            .and_then(|output| output.single())
            .map_err(engine_error)?;

        value.map(StorageEntry::try_from).transpose()
    }

    async fn write_entry(&self, entry: StorageEntry) -> Result<(), StorageError> {
        let key = Self::entry_key(&entry.record_type, &entry.id);
        let value: Vec<u8> = entry.try_into()?;

        self.runner
            .exec(Instruction::SaveCf { key, value })
            .await
            .map(|_| ())
            .map_err(engine_error)
    }

    async fn update_index(&self, record_type: &str, op: IndexOp) -> Result<(), StorageError> {
        let value: Vec<u8> = Bucket::single(op).try_into().map_err(engine_error)?;

        self.runner
            .exec(Instruction::MergeCf {
                key: Self::index_key(record_type),
                value,
            })
            .await
            .map(|_| ())
            .map_err(engine_error)
    }
}

#[async_trait]
impl StorageEngine for RocksEngine {
    async fn insert(&self, entry: StorageEntry) -> Result<(), StorageError> {
        let _guard = self.write.lock().await;

        let key = Self::entry_key(&entry.record_type, &entry.id);
        if self.read(key).await?.is_some() {
            return Err(StorageError::RecordDuplicate(entry.id));
        }

        let record_type = entry.record_type.clone();
        let id = entry.id.clone();

        self.write_entry(entry).await?;
        self.update_index(&record_type, IndexOp::Add(id.clone()))
            .await?;

        debug!("rocksdb entry inserted: {}:{}", record_type, id);
        Ok(())
    }

    async fn replace(
        &self,
        entry: StorageEntry,
        expected_version: u64,
    ) -> Result<(), StorageError> {
        let _guard = self.write.lock().await;

        let key = Self::entry_key(&entry.record_type, &entry.id);
        let current = self
            .read(key)
            .await?
            .ok_or(StorageError::RecordNotFound(entry.id.clone()))?;

        if current.version != expected_version {
            return Err(StorageError::VersionConflict(format!(
                "{}: expected {}, found {}",
                entry.id, expected_version, current.version
            )));
        }

        self.write_entry(entry).await
    }

    async fn fetch(
        &self,
        record_type: &str,
        id: &str,
    ) -> Result<Option<StorageEntry>, StorageError> {
        self.read(Self::entry_key(record_type, id)).await
    }

    async fn scan(&self, record_type: &str) -> Result<Vec<StorageEntry>, StorageError> {
        let index = self
            .runner
            .exec(Instruction::GetCf {
                key: Self::index_key(record_type),
            })
            .await
            .and_then(|output| output.single())
            .map_err(engine_error)?;

        let ids = match index {
            Some(bytes) => {
                let bucket: Bucket<IndexOp> = bytes.try_into().map_err(engine_error)?;
                bucket.ids()
            }
            None => return Ok(Vec::new()),
        };

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys = ids
            .iter()
            .map(|id| Self::entry_key(record_type, id))
            .collect();

        let values = self
            .runner
            .exec(Instruction::MultiGetCf { keys })
            .await
            .and_then(|output| output.multiple())
            .map_err(engine_error)?;

        let mut entries = Vec::new();
        for value in values {
            if let Some(bytes) = value.map_err(engine_error)? {
                entries.push(StorageEntry::try_from(bytes)?);
            }
        }

        Ok(entries)
    }

    async fn remove(&self, record_type: &str, id: &str) -> Result<(), StorageError> {
        let _guard = self.write.lock().await;

        let key = Self::entry_key(record_type, id);
        if self.read(key.clone()).await?.is_none() {
            return Err(StorageError::RecordNotFound(id.to_string()));
        }

        self.runner
            .exec(Instruction::RemoveCf { key })
            .await
            .map_err(engine_error)?;

        self.update_index(record_type, IndexOp::Remove(id.to_string()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use rst_common::standard::uuid::Uuid;
    use rst_common::with_tokio::tokio;

    use prople_courier_core::storage::types::Query;
    use prople_courier_core::storage::Store;

    use crate::common::helpers::testdb;

    fn engine() -> RocksEngine {
        RocksEngine::new(testdb::global_db_builder().clone())
    }

    fn entry(record_type: &str, id: &str, version: u64) -> StorageEntry {
        let mut tags = HashMap::new();
        tags.insert("state".to_string(), "active".to_string());

        StorageEntry {
            record_type: record_type.to_string(),
            id: id.to_string(),
            version,
            tags,
            value: br#"{"id":"value"}"#.to_vec(),
        }
    }

    // every test uses its own record type, the database is shared
    fn record_type() -> String {
        format!("test-{}", Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let engine = engine();
        let record_type = record_type();

        engine.insert(entry(&record_type, "1", 1)).await.unwrap();
        let fetched = engine.fetch(&record_type, "1").await.unwrap();
        assert_eq!(fetched, Some(entry(&record_type, "1", 1)));

        let duplicate = engine.insert(entry(&record_type, "1", 1)).await;
        assert!(matches!(duplicate, Err(StorageError::RecordDuplicate(_))));

        let missing = engine.fetch(&record_type, "2").await.unwrap();
        assert!(missing.is_none())
    }

    #[tokio::test]
    async fn test_replace_checks_version() {
        let engine = engine();
        let record_type = record_type();

        engine.insert(entry(&record_type, "1", 1)).await.unwrap();
        engine
            .replace(entry(&record_type, "1", 2), 1)
            .await
            .unwrap();

        let stale = engine.replace(entry(&record_type, "1", 2), 1).await;
        assert!(matches!(stale, Err(StorageError::VersionConflict(_))));

        let unknown = engine.replace(entry(&record_type, "9", 2), 1).await;
        assert!(matches!(unknown, Err(StorageError::RecordNotFound(_))));

        let fetched = engine.fetch(&record_type, "1").await.unwrap().unwrap();
        assert_eq!(fetched.version, 2)
    }

    #[tokio::test]
    async fn test_scan_follows_index() {
        let engine = engine();
        let record_type = record_type();

        assert!(engine.scan(&record_type).await.unwrap().is_empty());

        for id in ["1", "2", "3"] {
            engine.insert(entry(&record_type, id, 1)).await.unwrap();
        }

        engine.remove(&record_type, "2").await.unwrap();
        let removed = engine.remove(&record_type, "2").await;
        assert!(matches!(removed, Err(StorageError::RecordNotFound(_))));

        let mut ids = engine
            .scan(&record_type)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect::<Vec<String>>();
        ids.sort();

        assert_eq!(ids, vec!["1".to_string(), "3".to_string()]);
        assert!(engine.scan(&record_type()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_on_rocksdb() {
        use rst_common::standard::serde::{self, Deserialize, Serialize};

        use prople_courier_core::storage::types::{Record, Tags};

        #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
        #[serde(crate = "self::serde")]
        struct Note {
            id: String,
            topic: String,
            version: u64,
        }

        impl Record for Note {
            const RECORD_TYPE: &'static str = "rocksdb-test-note";

            fn id(&self) -> String {
                self.id.clone()
            }

            fn tags(&self) -> Tags {
                let mut tags = Tags::new();
                tags.insert("topic".to_string(), self.topic.clone());
                tags
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }
        }

        let store = Store::new(Arc::new(engine()));
        let topic = Uuid::new_v4().to_string();

        let mut note = Note {
            id: Uuid::new_v4().to_string(),
            topic: topic.clone(),
            version: 0,
        };

        store.save(&mut note).await.unwrap();
        let mut stale = note.clone();

        store.update(&mut note).await.unwrap();
        assert_eq!(note.version, 2);

        let conflict = store.update(&mut stale).await;
        assert!(matches!(conflict, Err(StorageError::VersionConflict(_))));

        let query = Query::new().with_tag("topic", &topic);
        let found = store.find_single_by_query::<Note>(&query).await.unwrap();
        assert_eq!(found, Some(note.clone()));

        store.delete(&note).await.unwrap();
        let found = store.find_by_query::<Note>(&query).await.unwrap();
        assert!(found.is_empty())
    }
}
