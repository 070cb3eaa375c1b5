//! Pending waits
//!
//! One single-use signal per job whose remote completion is awaited. Whoever removes
//! the entry owns the delivery of the result: the completion path sends on it, the
//! timeout/cancel path just drops it.

use std::collections::HashMap;

use muster_core::domain::job::JobStatus;
use tokio::sync::{Mutex, oneshot};

/// Terminal outcome delivered to the dispatcher awaiting a remote job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: JobStatus,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct PendingWaits {
    waits: Mutex<HashMap<u64, oneshot::Sender<Completion>>>,
}

impl PendingWaits {
    /// Registers a wait, returns None if one already exists for `job_id`
    pub(crate) async fn insert(&self, job_id: u64) -> Option<oneshot::Receiver<Completion>> {
        let mut waits = self.waits.lock().await;
        if waits.contains_key(&job_id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        waits.insert(job_id, tx);
        Some(rx)
    }

    /// Removes the wait and hands its signal to the caller
    pub(crate) async fn take(&self, job_id: u64) -> Option<oneshot::Sender<Completion>> {
        self.waits.lock().await.remove(&job_id)
    }

    pub(crate) async fn len(&self) -> usize {
        self.waits.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_wait_per_job() {
        let waits = PendingWaits::default();
        assert!(waits.insert(1).await.is_some());
        assert!(waits.insert(1).await.is_none());
        assert_eq!(waits.len().await, 1);
    }

    #[tokio::test]
    async fn test_take_delivers_once() {
        let waits = PendingWaits::default();
        let rx = waits.insert(1).await.unwrap();

        let tx = waits.take(1).await.unwrap();
        assert!(waits.take(1).await.is_none());

        tx.send(Completion {
            status: JobStatus::Successful,
            error: None,
        })
        .unwrap();
        assert_eq!(rx.await.unwrap().status, JobStatus::Successful);
        assert_eq!(waits.len().await, 0);
    }
}
