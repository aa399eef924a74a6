use std::collections::HashMap;
use std::sync::Arc;

use rst_common::standard::async_trait::async_trait;
use rst_common::with_tokio::tokio::{self, sync::RwLock};

use super::types::{StorageEngine, StorageEntry, StorageError};

type EntryKey = (String, String);

/// `MemoryEngine` keeps every entry in a process local map
#[derive(Clone, Default)]
pub struct MemoryEngine {
    entries: Arc<RwLock<HashMap<EntryKey, StorageEntry>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(record_type: &str, id: &str) -> EntryKey {
        (record_type.to_string(), id.to_string())
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn insert(&self, entry: StorageEntry) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        let key = Self::key(&entry.record_type, &entry.id);
        if entries.contains_key(&key) {
            return Err(StorageError::RecordDuplicate(entry.id));
        }

        entries.insert(key, entry);
        Ok(())
    }

    async fn replace(
        &self,
        entry: StorageEntry,
        expected_version: u64,
    ) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        let key = Self::key(&entry.record_type, &entry.id);

        let current = entries
            .get(&key)
            .ok_or(StorageError::RecordNotFound(entry.id.clone()))?;

        if current.version != expected_version {
            return Err(StorageError::VersionConflict(format!(
                "{}: expected {}, found {}",
                entry.id, expected_version, current.version
            )));
        }

        entries.insert(key, entry);
        Ok(())
    }

    async fn fetch(
        &self,
        record_type: &str,
        id: &str,
    ) -> Result<Option<StorageEntry>, StorageError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&Self::key(record_type, id))
            .cloned())
    }

    async fn scan(&self, record_type: &str) -> Result<Vec<StorageEntry>, StorageError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.record_type == record_type)
            .cloned()
            .collect())
    }

    async fn remove(&self, record_type: &str, id: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .remove(&Self::key(record_type, id))
            .map(|_| ())
            .ok_or(StorageError::RecordNotFound(id.to_string()))
    }
}

/// `InterleavedEngine` yields to the scheduler before every operation, so concurrent callers
/// joined on one task alternate between their storage steps
#[cfg(test)]
#[derive(Clone, Default)]
pub struct InterleavedEngine {
    inner: MemoryEngine,
}

#[cfg(test)]
#[async_trait]
impl StorageEngine for InterleavedEngine {
    async fn insert(&self, entry: StorageEntry) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.inner.insert(entry).await
    }

    async fn replace(
        &self,
        entry: StorageEntry,
        expected_version: u64,
    ) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.inner.replace(entry, expected_version).await
    }

    async fn fetch(
        &self,
        record_type: &str,
        id: &str,
    ) -> Result<Option<StorageEntry>, StorageError> {
        tokio::task::yield_now().await;
        self.inner.fetch(record_type, id).await
    }

    async fn scan(&self, record_type: &str) -> Result<Vec<StorageEntry>, StorageError> {
        tokio::task::yield_now().await;
        self.inner.scan(record_type).await
    }

    async fn remove(&self, record_type: &str, id: &str) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.inner.remove(record_type, id).await
    }
}
