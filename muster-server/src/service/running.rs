//! Running jobs
//!
//! Cancellation handles of every job currently being dispatched, so that the `cancel`
//! and `kill` builtins can stop a job started by another request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

/// Job id to cancellation token of the dispatch running it
#[derive(Debug, Default)]
pub struct RunningJobs {
    tokens: Mutex<HashMap<u64, CancellationToken>>,
}

impl RunningJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `job_id` until the returned guard is dropped.
    ///
    /// The guard's token is a child of `parent`, so cancelling the caller's context
    /// cancels the job too.
    pub fn track(self: &Arc<Self>, job_id: u64, parent: &CancellationToken) -> RunningGuard {
        let token = parent.child_token();
        self.lock().insert(job_id, token.clone());
        RunningGuard {
            jobs: Arc::clone(self),
            job_id,
            token,
        }
    }

    /// Cancels a running job, returns false when it is not running here
    pub fn cancel(&self, job_id: u64) -> bool {
        match self.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: u64) -> bool {
        self.lock().contains_key(&job_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        // The map stays consistent even if a holder panicked.
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a job registered in RunningJobs while alive
pub struct RunningGuard {
    jobs: Arc<RunningJobs>,
    job_id: u64,
    token: CancellationToken,
}

impl RunningGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.jobs.lock().remove(&self.job_id);
    }
}
