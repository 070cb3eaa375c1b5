//! Record Store
//!
//! Keyed persistence for job records. The job repository owns identity and lifecycle
//! rules; a record store only saves and loads whole records.

use std::collections::BTreeMap;

use async_trait::async_trait;
use muster_core::domain::job::Job;
use thiserror::Error;
use tokio::sync::RwLock;

/// Failure of the underlying storage engine
#[derive(Debug, Error)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

/// Keyed store of job records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts or replaces the record with `job.id`
    async fn put(&self, job: Job) -> Result<(), StorageError>;

    /// Loads one record
    async fn get(&self, id: u64) -> Result<Option<Job>, StorageError>;

    /// Loads every record, ordered by id descending
    async fn scan_newest_first(&self) -> Result<Vec<Job>, StorageError>;

    /// Highest id ever stored, used to seed the id counter
    async fn last_id(&self) -> Result<Option<u64>, StorageError>;
}

/// In-memory implementation of RecordStore
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<u64, Job>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put(&self, job: Job) -> Result<(), StorageError> {
        self.records.write().await.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<Job>, StorageError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn scan_newest_first(&self) -> Result<Vec<Job>, StorageError> {
        Ok(self.records.read().await.values().rev().cloned().collect())
    }

    async fn last_id(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.records.read().await.keys().next_back().copied())
    }
}
