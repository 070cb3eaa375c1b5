//! Remote Pipeline
//!
//! Keeps track of connected workers, forwards assignments to them and routes their
//! completion reports back to the dispatcher waiting for each job.
//!
//! Every terminal report, whether sent by a worker or synthesized when a worker goes
//! away, flows through [`RemotePipeline::complete`]. Removing the pending wait there is
//! what grants the right to finish the job, so a job is finished exactly once no matter
//! which path gets there first.

mod connection;
mod pending;
mod workers;

pub use connection::{TransportError, WorkerSink, WorkerStream};
pub use pending::Completion;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use muster_core::domain::worker::Worker;
use muster_core::dto::protocol::{Assignment, FinishReport, Registration, ServerMessage};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::repository::{JobStore, LogRepository};
use pending::PendingWaits;
use workers::{WorkerConnection, WorkerRegistry};

/// Message used for jobs whose worker went away before reporting
pub const WORKER_DISCONNECTED: &str = "worker disconnected";

/// Pipeline error type
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no connected worker can run {0}")]
    NoWorkerAvailable(String),

    #[error("worker {0} has too many queued assignments")]
    WorkerBusy(String),

    #[error("a worker with token {0} is already connected")]
    DuplicateWorker(String),

    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("job {0} is already awaited")]
    AlreadyWaiting(u64),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Tuning of worker connections
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Assignments that can be queued for a single worker before it counts as busy
    pub outbound_capacity: usize,
    /// Interval of the keepalive sent on idle connections
    pub heartbeat_interval: Duration,
    /// How long a new connection may take to send its registration
    pub registration_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 32,
            heartbeat_interval: Duration::from_secs(5),
            registration_timeout: Duration::from_secs(10),
        }
    }
}

/// A registered worker connection, handed to the loop that serves it
pub struct WorkerSession {
    pub token: String,
    pub connection_id: u64,
    outbound: mpsc::Receiver<ServerMessage>,
}

impl WorkerSession {
    /// Next message queued for this worker, None once the worker was removed
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.outbound.recv().await
    }
}

/// The remote pipeline
pub struct RemotePipeline {
    store: Arc<JobStore>,
    logs: Arc<dyn LogRepository>,
    workers: Mutex<WorkerRegistry>,
    pending: PendingWaits,
    config: PipelineConfig,
    shutdown: CancellationToken,
    next_connection_id: AtomicU64,
}

impl RemotePipeline {
    pub fn new(store: Arc<JobStore>, logs: Arc<dyn LogRepository>, config: PipelineConfig) -> Self {
        Self {
            store,
            logs,
            workers: Mutex::new(WorkerRegistry::default()),
            pending: PendingWaits::default(),
            config,
            shutdown: CancellationToken::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Stops every connection loop; their workers are closed as if they disconnected
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Registers a worker under its token
    pub async fn register(&self, registration: Registration) -> Result<WorkerSession, PipelineError> {
        validate_registration(&registration)?;

        let mut workers = self.workers.lock().await;
        if workers.contains(&registration.token) {
            return Err(PipelineError::DuplicateWorker(registration.token));
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, outbound_rx) = mpsc::channel(self.config.outbound_capacity);
        let capabilities: BTreeSet<String> = registration.capabilities.into_iter().collect();

        tracing::info!(
            "Worker {} registered with capabilities: {:?}",
            registration.token,
            capabilities
        );

        workers.add(WorkerConnection {
            token: registration.token.clone(),
            connection_id,
            capabilities,
            outbound,
            in_flight: BTreeSet::new(),
            connected_at: Utc::now(),
        });

        Ok(WorkerSession {
            token: registration.token,
            connection_id,
            outbound: outbound_rx,
        })
    }

    /// Creates the pending wait for a job about to be dispatched
    pub async fn await_completion(
        &self,
        job_id: u64,
    ) -> Result<oneshot::Receiver<Completion>, PipelineError> {
        self.pending
            .insert(job_id)
            .await
            .ok_or(PipelineError::AlreadyWaiting(job_id))
    }

    /// Queues an assignment on a capable worker, returns the chosen worker's token
    ///
    /// Never blocks on a slow worker: a full queue fails with `WorkerBusy`. A worker
    /// whose connection just closed is skipped once in favour of another one.
    pub async fn dispatch(&self, assignment: Assignment) -> Result<String, PipelineError> {
        let job_id = assignment.job_id;
        let mut workers = self.workers.lock().await;
        let mut skipped: Option<String> = None;

        for _ in 0..2 {
            let Some(worker) = workers.select(&assignment.command, skipped.as_deref()) else {
                break;
            };

            match worker
                .outbound
                .try_send(ServerMessage::Assign(assignment.clone()))
            {
                Ok(()) => {
                    worker.in_flight.insert(job_id);
                    tracing::info!("Job {} assigned to worker {}", job_id, worker.token);
                    return Ok(worker.token.clone());
                }
                Err(TrySendError::Full(_)) => {
                    return Err(PipelineError::WorkerBusy(worker.token.clone()));
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("Worker {} is closing, selecting another one", worker.token);
                    skipped = Some(worker.token.clone());
                }
            }
        }

        Err(PipelineError::NoWorkerAvailable(assignment.command))
    }

    /// Handles a completion report sent by worker `token`
    ///
    /// Reports for jobs the worker does not hold (unknown, already timed out or
    /// cancelled) are dropped.
    pub async fn report(&self, token: &str, report: FinishReport) {
        if !report.status.is_terminal() {
            tracing::warn!(
                "Worker {} reported non-terminal status {} for job {}, ignoring",
                token,
                report.status,
                report.job_id
            );
            return;
        }

        let assigned = {
            let mut workers = self.workers.lock().await;
            workers
                .get_mut(token)
                .map(|worker| worker.in_flight.remove(&report.job_id))
                .unwrap_or(false)
        };

        if !assigned {
            tracing::info!(
                "Discarding report from worker {} for job {}, it is no longer assigned",
                token,
                report.job_id
            );
            return;
        }

        self.complete(report).await;
    }

    /// Stores an output line of a job held by worker `token`
    pub async fn append_log(&self, token: &str, job_id: u64, line: String) {
        let assigned = {
            let mut workers = self.workers.lock().await;
            workers
                .get_mut(token)
                .is_some_and(|worker| worker.in_flight.contains(&job_id))
        };

        if !assigned {
            tracing::debug!("Dropping log line from {} for unassigned job {}", token, job_id);
            return;
        }

        if let Err(e) = self.logs.append(job_id, line).await {
            tracing::error!("Failed to append log for job {}: {}", job_id, e);
        }
    }

    /// Gives up waiting for a job
    ///
    /// Returns true when the caller now owns the job's outcome. False means a
    /// completion already claimed the wait and its result is on the way.
    pub async fn abandon(&self, job_id: u64) -> bool {
        if self.pending.take(job_id).await.is_none() {
            return false;
        }

        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.holding(job_id) {
            worker.in_flight.remove(&job_id);
            if let Err(e) = worker.outbound.try_send(ServerMessage::Cancel { job_id }) {
                tracing::debug!("Could not send cancel for job {} to {}: {}", job_id, worker.token, e);
            }
        }

        true
    }

    /// Removes a worker and errors out every job it still held
    pub async fn close(&self, token: &str, connection_id: u64) {
        let Some(worker) = self.workers.lock().await.remove(token, connection_id) else {
            return;
        };

        tracing::info!(
            "Worker {} disconnected with {} job(s) in flight",
            token,
            worker.in_flight.len()
        );

        // Dropping the connection closes its outbound queue.
        let WorkerConnection { in_flight, .. } = worker;
        for job_id in in_flight {
            self.complete(FinishReport::errored(job_id, WORKER_DISCONNECTED))
                .await;
        }
    }

    /// Connected workers in registration order
    pub async fn workers(&self) -> Vec<Worker> {
        self.workers.lock().await.summaries()
    }

    /// Number of dispatches currently waiting on a worker
    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    async fn complete(&self, report: FinishReport) {
        let Some(signal) = self.pending.take(report.job_id).await else {
            tracing::info!(
                "Discarding {} report for job {}, nobody is waiting for it",
                report.status,
                report.job_id
            );
            return;
        };

        let error = report.error.filter(|_| report.status.carries_error());

        if let Err(e) = self
            .store
            .finish(report.job_id, report.status, error.clone())
            .await
        {
            tracing::error!("Failed to finish job {}: {}", report.job_id, e);
        }

        if signal
            .send(Completion {
                status: report.status,
                error,
            })
            .is_err()
        {
            tracing::debug!("Dispatcher of job {} is gone", report.job_id);
        }
    }
}

fn validate_registration(registration: &Registration) -> Result<(), PipelineError> {
    if registration.token.trim().is_empty() {
        return Err(PipelineError::InvalidRegistration(
            "token cannot be empty".to_string(),
        ));
    }

    if registration.capabilities.is_empty() {
        return Err(PipelineError::InvalidRegistration(
            "at least one capability is required".to_string(),
        ));
    }

    Ok(())
}
