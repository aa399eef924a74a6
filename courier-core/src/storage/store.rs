use std::sync::Arc;

use rst_common::with_logging::log::debug;

use super::memory::MemoryEngine;
use super::types::{Query, Record, StorageEngine, StorageEntry, StorageError};

/// `Store` is the typed record store used by all services
#[derive(Clone)]
pub struct Store {
    engine: Arc<dyn StorageEngine>,
}

impl Store {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryEngine::new()))
    }

    #[cfg(test)]
    pub fn interleaved() -> Self {
        Self::new(Arc::new(super::memory::InterleavedEngine::default()))
    }

    /// `save` persists a new record, its version starts at `1`
    pub async fn save<T: Record>(&self, record: &mut T) -> Result<(), StorageError> {
        record.set_version(1);
        let entry = StorageEntry::from_record(record)?;
        self.engine.insert(entry).await?;

        debug!("record saved: {}:{}", T::RECORD_TYPE, record.id());
        Ok(())
    }

    /// `update` replaces the stored record only if nobody updated it since it was read
    pub async fn update<T: Record>(&self, record: &mut T) -> Result<(), StorageError> {
        let expected = record.version();

        let mut next = record.clone();
        next.set_version(expected + 1);

        let entry = StorageEntry::from_record(&next)?;
        self.engine.replace(entry, expected).await?;

        record.set_version(expected + 1);
        Ok(())
    }

    pub async fn get_by_id<T: Record>(&self, id: &str) -> Result<T, StorageError> {
        self.find_by_id(id)
            .await?
            .ok_or(StorageError::RecordNotFound(format!(
                "{}:{}",
                T::RECORD_TYPE,
                id
            )))
    }

    pub async fn find_by_id<T: Record>(&self, id: &str) -> Result<Option<T>, StorageError> {
        match self.engine.fetch(T::RECORD_TYPE, id).await? {
            Some(entry) => Ok(Some(entry.to_record()?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_query<T: Record>(&self, query: &Query) -> Result<Vec<T>, StorageError> {
        let entries = self.engine.scan(T::RECORD_TYPE).await?;

        entries
            .iter()
            .filter(|entry| query.matches(&entry.tags))
            .map(|entry| entry.to_record())
            .collect()
    }

    /// `find_single_by_query` fails with [`StorageError::RecordDuplicate`] when the query is
    /// ambiguous
    pub async fn find_single_by_query<T: Record>(
        &self,
        query: &Query,
    ) -> Result<Option<T>, StorageError> {
        let mut records = self.find_by_query::<T>(query).await?;
        if records.len() > 1 {
            return Err(StorageError::RecordDuplicate(format!(
                "{}: {} records for {:?}",
                T::RECORD_TYPE,
                records.len(),
                query
            )));
        }

        Ok(records.pop())
    }

    pub async fn get_all<T: Record>(&self) -> Result<Vec<T>, StorageError> {
        self.find_by_query(&Query::new()).await
    }

    pub async fn delete<T: Record>(&self, record: &T) -> Result<(), StorageError> {
        self.engine.remove(T::RECORD_TYPE, &record.id()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rst_common::standard::serde::{self, Deserialize, Serialize};
    use rst_common::with_tokio::tokio;

    use crate::storage::types::Tags;

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    #[serde(crate = "self::serde")]
    struct FakeRecord {
        id: String,
        state: String,
        #[serde(default)]
        version: u64,
    }

    impl FakeRecord {
        fn new(id: &str, state: &str) -> Self {
            Self {
                id: id.to_string(),
                state: state.to_string(),
                version: 0,
            }
        }
    }

    impl Record for FakeRecord {
        const RECORD_TYPE: &'static str = "fake";

        fn id(&self) -> String {
            self.id.clone()
        }

        fn tags(&self) -> Tags {
            Tags::from([("state".to_string(), self.state.clone())])
        }

        fn version(&self) -> u64 {
            self.version
        }

        fn set_version(&mut self, version: u64) {
            self.version = version
        }
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let store = Store::in_memory();
        let mut record = FakeRecord::new("1", "initial");

        store.save(&mut record).await.unwrap();
        assert_eq!(record.version, 1);

        let found: FakeRecord = store.get_by_id("1").await.unwrap();
        assert_eq!(found, record);

        let duplicate = store.save(&mut FakeRecord::new("1", "initial")).await;
        assert!(matches!(
            duplicate.unwrap_err(),
            StorageError::RecordDuplicate(_)
        ));

        let missing = store.get_by_id::<FakeRecord>("2").await;
        assert!(matches!(
            missing.unwrap_err(),
            StorageError::RecordNotFound(_)
        ))
    }

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let store = Store::in_memory();
        let mut record = FakeRecord::new("1", "initial");
        store.save(&mut record).await.unwrap();

        let mut first: FakeRecord = store.get_by_id("1").await.unwrap();
        let mut second: FakeRecord = store.get_by_id("1").await.unwrap();

        first.state = "first".to_string();
        store.update(&mut first).await.unwrap();
        assert_eq!(first.version, 2);

        second.state = "second".to_string();
        let result = store.update(&mut second).await;
        assert!(matches!(
            result.unwrap_err(),
            StorageError::VersionConflict(_)
        ));
        assert_eq!(second.version, 1);

        let stored: FakeRecord = store.get_by_id("1").await.unwrap();
        assert_eq!(stored.state, "first")
    }

    #[tokio::test]
    async fn test_query_by_tags() {
        let store = Store::in_memory();
        store.save(&mut FakeRecord::new("1", "done")).await.unwrap();
        store.save(&mut FakeRecord::new("2", "done")).await.unwrap();
        store.save(&mut FakeRecord::new("3", "initial")).await.unwrap();

        let done: Vec<FakeRecord> = store
            .find_by_query(&Query::new().with_tag("state", "done"))
            .await
            .unwrap();
        assert_eq!(done.len(), 2);

        let single: Option<FakeRecord> = store
            .find_single_by_query(&Query::new().with_tag("state", "initial"))
            .await
            .unwrap();
        assert_eq!(single.map(|record| record.id), Some("3".to_string()));

        let ambiguous = store
            .find_single_by_query::<FakeRecord>(&Query::new().with_tag("state", "done"))
            .await;
        assert!(matches!(
            ambiguous.unwrap_err(),
            StorageError::RecordDuplicate(_)
        ));

        let all: Vec<FakeRecord> = store.get_all().await.unwrap();
        assert_eq!(all.len(), 3);

        store.delete(&all[0]).await.unwrap();
        assert_eq!(store.get_all::<FakeRecord>().await.unwrap().len(), 2)
    }

    #[tokio::test]
    async fn test_concurrent_save_of_same_id() {
        let store = Store::interleaved();
        let mut first = FakeRecord::new("1", "first");
        let mut second = FakeRecord::new("1", "second");

        let (first, second) = tokio::join!(store.save(&mut first), store.save(&mut second));
        let duplicates = [first, second]
            .into_iter()
            .filter(|result| matches!(result, Err(StorageError::RecordDuplicate(_))))
            .count();

        assert_eq!(duplicates, 1);
        assert_eq!(store.get_all::<FakeRecord>().await.unwrap().len(), 1)
    }
}
