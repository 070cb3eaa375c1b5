//! Job Repository
//!
//! Owns job identity and the Running -> terminal lifecycle on top of a record store.

use std::sync::Arc;

use chrono::Utc;
use muster_core::domain::job::{Job, JobStatus, Request};
use muster_core::dto::job::JobQuery;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::repository::record::{InMemoryRecordStore, RecordStore, StorageError};

/// Job store error type
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {id} cannot transition to {requested}: {reason}")]
    InvalidTransition {
        id: u64,
        requested: JobStatus,
        reason: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The job store
///
/// Writes (creation and finish) are serialized behind a single lock that also holds
/// the id counter, so ids follow creation order and a job can only leave `Running`
/// once.
pub struct JobStore {
    records: Arc<dyn RecordStore>,
    last_id: Mutex<u64>,
}

impl JobStore {
    /// Opens a store on top of `records`, continuing after the highest stored id
    pub async fn open(records: Arc<dyn RecordStore>) -> Result<Self> {
        let last_id = records.last_id().await?.unwrap_or(0);
        Ok(Self {
            records,
            last_id: Mutex::new(last_id),
        })
    }

    /// Store backed by an empty in-memory record store
    pub fn in_memory() -> Self {
        Self {
            records: Arc::new(InMemoryRecordStore::new()),
            last_id: Mutex::new(0),
        }
    }

    /// Create a new running job for `request`
    pub async fn create(&self, request: Request) -> Result<Job> {
        let mut last_id = self.last_id.lock().await;

        // An id is burnt even if the write fails, so it can never be handed out twice.
        *last_id += 1;
        let job = Job {
            id: *last_id,
            request,
            status: JobStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
        };

        self.records.put(job.clone()).await?;

        tracing::debug!("Job {} created for command {}", job.id, job.request.command);

        Ok(job)
    }

    /// Move a running job to a terminal status
    ///
    /// The error message is only recorded for `Failed` and `Errored`.
    pub async fn finish(&self, id: u64, status: JobStatus, error: Option<String>) -> Result<Job> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id,
                requested: status,
                reason: "not a terminal status".to_string(),
            });
        }

        let _guard = self.last_id.lock().await;

        let mut job = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| StoreError::InvalidTransition {
                id,
                requested: status,
                reason: "job does not exist".to_string(),
            })?;

        if job.is_finished() {
            return Err(StoreError::InvalidTransition {
                id,
                requested: status,
                reason: format!("job is already {}", job.status),
            });
        }

        job.status = status;
        job.end_time = Some(Utc::now());
        if status.carries_error() {
            job.error_message = error;
        }

        self.records.put(job.clone()).await?;

        tracing::info!("Job {} finished with status: {}", id, status);

        Ok(job)
    }

    /// Get a job by ID
    pub async fn find(&self, id: u64) -> Result<Option<Job>> {
        Ok(self.records.get(id).await?)
    }

    /// List jobs newest first, optionally filtered by requesting user and truncated
    pub async fn query(&self, filter: &JobQuery) -> Result<Vec<Job>> {
        let jobs = self.records.scan_newest_first().await?;

        let matching = jobs.into_iter().filter(|job| match &filter.user {
            Some(user) => &job.request.username == user,
            None => true,
        });

        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    fn request_by(user: &str) -> Request {
        Request {
            command: "command".to_string(),
            args: vec!["arg1".to_string(), "arg2".to_string()],
            channel: "general".to_string(),
            channel_id: "123".to_string(),
            channel_link: "<#123>".to_string(),
            username: user.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_find_is_running() {
        let store = JobStore::in_memory();
        let job = store.create(request_by("someone")).await.unwrap();

        let found = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(found.id, 1);
        assert_eq!(found.status, JobStatus::Running);
        assert!(found.end_time.is_none());
        assert!(found.error_message.is_none());
        assert_eq!(found.request, request_by("someone"));
    }

    #[tokio::test]
    async fn test_find_missing_job() {
        let store = JobStore::in_memory();
        assert!(store.find(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finish_records_end_time_and_error() {
        let store = JobStore::in_memory();
        let job = store.create(request_by("someone")).await.unwrap();

        store
            .finish(job.id, JobStatus::Failed, Some("exit status 1".to_string()))
            .await
            .unwrap();

        let found = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Failed);
        assert!(found.end_time.is_some());
        assert_eq!(found.error_message.as_deref(), Some("exit status 1"));
    }

    #[tokio::test]
    async fn test_successful_finish_drops_error_message() {
        let store = JobStore::in_memory();
        let job = store.create(request_by("someone")).await.unwrap();

        let finished = store
            .finish(job.id, JobStatus::Successful, Some("ignored".to_string()))
            .await
            .unwrap();
        assert!(finished.error_message.is_none());
    }

    #[tokio::test]
    async fn test_second_finish_is_rejected_and_keeps_first_status() {
        let store = JobStore::in_memory();
        let job = store.create(request_by("someone")).await.unwrap();

        let first = store
            .finish(job.id, JobStatus::Successful, None)
            .await
            .unwrap();
        let second = store
            .finish(job.id, JobStatus::Errored, Some("late".to_string()))
            .await;

        assert!(matches!(
            second,
            Err(StoreError::InvalidTransition { id: 1, .. })
        ));

        let found = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Successful);
        assert_eq!(found.end_time, first.end_time);
        assert!(found.error_message.is_none());
    }

    #[tokio::test]
    async fn test_finish_missing_job_is_invalid_transition() {
        let store = JobStore::in_memory();
        let result = store.finish(5, JobStatus::Successful, None).await;
        assert!(matches!(result, Err(StoreError::InvalidTransition { id: 5, .. })));
    }

    #[tokio::test]
    async fn test_finish_to_running_is_rejected() {
        let store = JobStore::in_memory();
        let job = store.create(request_by("someone")).await.unwrap();

        let result = store.finish(job.id, JobStatus::Running, None).await;
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
        assert_eq!(
            store.find(job.id).await.unwrap().unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_unique_increasing_ids() {
        let store = Arc::new(JobStore::in_memory());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..25 {
                    ids.push(store.create(request_by("someone")).await.unwrap().id);
                }
                ids
            }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            let ids = handle.await.unwrap();
            // Each task sees its own ids strictly increasing.
            assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
            for id in ids {
                assert!(all.insert(id), "duplicate id {}", id);
            }
        }

        assert_eq!(all.len(), 400);
        assert_eq!(all.iter().copied().max(), Some(400));
        assert_eq!(all.iter().copied().min(), Some(1));
    }

    #[tokio::test]
    async fn test_query_filters_by_user_newest_first_with_limit() {
        let store = JobStore::in_memory();
        for user in ["a", "b", "a", "a", "b"] {
            store.create(request_by(user)).await.unwrap();
        }

        let jobs = store
            .query(&JobQuery {
                user: Some("a".to_string()),
                limit: Some(2),
            })
            .await
            .unwrap();
        let ids: Vec<u64> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![4, 3]);

        let all: Vec<u64> = store
            .query(&JobQuery::default())
            .await
            .unwrap()
            .iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(all, vec![5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_open_continues_after_existing_records() {
        let records = Arc::new(InMemoryRecordStore::new());
        {
            let store = JobStore::open(records.clone()).await.unwrap();
            store.create(request_by("a")).await.unwrap();
            store.create(request_by("a")).await.unwrap();
        }

        let reopened = JobStore::open(records).await.unwrap();
        let job = reopened.create(request_by("a")).await.unwrap();
        assert_eq!(job.id, 3);
    }

    struct BrokenRecords;

    #[async_trait]
    impl RecordStore for BrokenRecords {
        async fn put(&self, _job: Job) -> std::result::Result<(), StorageError> {
            Err(StorageError("disk full".to_string()))
        }

        async fn get(&self, _id: u64) -> std::result::Result<Option<Job>, StorageError> {
            Err(StorageError("disk full".to_string()))
        }

        async fn scan_newest_first(&self) -> std::result::Result<Vec<Job>, StorageError> {
            Err(StorageError("disk full".to_string()))
        }

        async fn last_id(&self) -> std::result::Result<Option<u64>, StorageError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_storage_failures_are_propagated() {
        let store = JobStore::open(Arc::new(BrokenRecords)).await.unwrap();

        assert!(matches!(
            store.create(request_by("a")).await,
            Err(StoreError::Storage(_))
        ));
        assert!(matches!(store.find(1).await, Err(StoreError::Storage(_))));
        assert!(matches!(
            store.query(&JobQuery::default()).await,
            Err(StoreError::Storage(_))
        ));
    }
}
