//! Job executor
//!
//! Runs assigned jobs as local programs, each in its own task, bounded by a semaphore.
//! Output lines and the final report are queued on the session's outgoing channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use muster_core::dto::protocol::{AgentMessage, Assignment, FinishReport};
use muster_core::shell::{self, ShellOutcome};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CommandTarget;

pub struct Executor {
    commands: BTreeMap<String, CommandTarget>,
    semaphore: Arc<Semaphore>,
    running: Mutex<HashMap<u64, CancellationToken>>,
    outgoing: mpsc::UnboundedSender<AgentMessage>,
}

impl Executor {
    pub fn new(
        commands: BTreeMap<String, CommandTarget>,
        max_parallel_jobs: usize,
        outgoing: mpsc::UnboundedSender<AgentMessage>,
    ) -> Self {
        Self {
            commands,
            semaphore: Arc::new(Semaphore::new(max_parallel_jobs)),
            running: Mutex::new(HashMap::new()),
            outgoing,
        }
    }

    /// Starts an assigned job; unknown commands are reported as errored right away
    pub fn spawn(self: &Arc<Self>, assignment: Assignment) {
        let job_id = assignment.job_id;

        let Some(target) = self.commands.get(&assignment.command).cloned() else {
            warn!("Job {} asks for unsupported command {}", job_id, assignment.command);
            self.report(FinishReport::errored(
                job_id,
                format!("unsupported command {}", assignment.command),
            ));
            return;
        };

        let cancel = CancellationToken::new();
        self.lock().insert(job_id, cancel.clone());

        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let report = executor.execute(assignment, target, cancel).await;
            executor.lock().remove(&job_id);
            executor.report(report);
        });
    }

    async fn execute(
        &self,
        assignment: Assignment,
        target: CommandTarget,
        cancel: CancellationToken,
    ) -> FinishReport {
        let job_id = assignment.job_id;

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return FinishReport::cancelled(job_id),
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return FinishReport::errored(job_id, "agent is shutting down"),
            },
        };

        info!("Starting job {}: {}", job_id, assignment.command);

        let mut args = target.args;
        args.extend(assignment.args);

        let outgoing = self.outgoing.clone();
        let outcome = shell::run(&target.program, &args, &cancel, |line| {
            let _ = outgoing.send(AgentMessage::Log { job_id, line });
        })
        .await;

        match outcome {
            ShellOutcome::Success { .. } => {
                info!("Job {} succeeded", job_id);
                FinishReport::successful(job_id)
            }
            ShellOutcome::Failure { error, .. } => {
                info!("Job {} failed: {}", job_id, error);
                FinishReport::failed(job_id, error)
            }
            ShellOutcome::Errored { error } => {
                warn!("Job {} could not run: {}", job_id, error);
                FinishReport::errored(job_id, error)
            }
            ShellOutcome::Cancelled { .. } => {
                info!("Job {} cancelled", job_id);
                FinishReport::cancelled(job_id)
            }
        }
    }

    /// Cancels a job, returns false when it is not running here
    pub fn cancel(&self, job_id: u64) -> bool {
        match self.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every running job, used when the connection is lost
    pub fn cancel_all(&self) {
        let running = self.lock();
        if !running.is_empty() {
            info!("Cancelling {} running job(s)", running.len());
        }
        for token in running.values() {
            token.cancel();
        }
    }

    fn report(&self, report: FinishReport) {
        if self.outgoing.send(AgentMessage::Finish(report)).is_err() {
            debug!("Connection closed before the report could be sent");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
