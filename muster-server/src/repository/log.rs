//! Log Repository
//!
//! Output lines of jobs, keyed by job id. Written by shell commands and by remote
//! agents streaming their output, read by the log builtins and the HTTP API.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::repository::record::StorageError;

/// Repository trait for job output
#[async_trait]
pub trait LogRepository: Send + Sync {
    /// Appends one line to the output of a job
    async fn append(&self, job_id: u64, line: String) -> Result<(), StorageError>;

    /// Returns every line recorded for a job, in append order
    async fn read(&self, job_id: u64) -> Result<Vec<String>, StorageError>;
}

/// In-memory implementation of LogRepository
#[derive(Default)]
pub struct InMemoryLogRepository {
    lines: RwLock<HashMap<u64, Vec<String>>>,
}

impl InMemoryLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogRepository for InMemoryLogRepository {
    async fn append(&self, job_id: u64, line: String) -> Result<(), StorageError> {
        self.lines.write().await.entry(job_id).or_default().push(line);
        Ok(())
    }

    async fn read(&self, job_id: u64) -> Result<Vec<String>, StorageError> {
        Ok(self
            .lines
            .read()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }
}
