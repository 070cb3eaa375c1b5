//! Dispatcher
//!
//! Single entry point for running a command: resolves and authorizes it, records a
//! job, then runs it in-process, as a shell invocation or on a remote worker.

use std::sync::Arc;
use std::time::Duration;

use muster_core::domain::job::{Job, JobStatus, Request};
use muster_core::dto::protocol::Assignment;
use muster_core::shell::{self, ShellOutcome};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::pipeline::{Completion, PipelineError, RemotePipeline};
use crate::repository::{JobStore, LogRepository, StoreError};
use crate::service::auth::{Authorizer, Groups};
use crate::service::registry::{
    CommandContext, CommandDescriptor, CommandError, CommandKind, CommandRegistry, ShellInvocation,
};
use crate::service::running::RunningJobs;

/// Dispatch error type
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown command {0}")]
    UnknownCommand(String),

    #[error("{user} is not allowed to run {command}")]
    Unauthorized { command: String, user: String },

    #[error("no worker available to run {0}")]
    NoWorkerAvailable(String),

    #[error("worker {0} is busy")]
    WorkerBusy(String),

    #[error("job {job_id} failed: {message}")]
    Failed { job_id: u64, message: String },

    #[error("job {job_id} errored: {message}")]
    Errored { job_id: u64, message: String },

    #[error("job {0} was cancelled")]
    Cancelled(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Job left behind by the failed dispatch, if one was created
    pub fn job_id(&self) -> Option<u64> {
        match self {
            DispatchError::Failed { job_id, .. } | DispatchError::Errored { job_id, .. } => {
                Some(*job_id)
            }
            DispatchError::Cancelled(job_id) => Some(*job_id),
            _ => None,
        }
    }
}

/// Output of a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub job_id: u64,
    pub output: String,
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// The dispatcher
pub struct Dispatcher {
    store: Arc<JobStore>,
    logs: Arc<dyn LogRepository>,
    registry: Arc<CommandRegistry>,
    authorizer: Arc<dyn Authorizer>,
    groups: Arc<Groups>,
    pipeline: Arc<RemotePipeline>,
    running: Arc<RunningJobs>,
    remote_timeout: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<JobStore>,
        logs: Arc<dyn LogRepository>,
        registry: Arc<CommandRegistry>,
        authorizer: Arc<dyn Authorizer>,
        groups: Arc<Groups>,
        pipeline: Arc<RemotePipeline>,
        running: Arc<RunningJobs>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            store,
            logs,
            registry,
            authorizer,
            groups,
            pipeline,
            running,
            remote_timeout,
        }
    }

    /// Runs `request` to completion
    ///
    /// Errors found before the job is created leave no trace; any later error leaves
    /// the job in a terminal status.
    pub async fn execute(&self, cancel: CancellationToken, request: Request) -> Result<Dispatched> {
        let descriptor = self
            .registry
            .find(&request.command)
            .ok_or_else(|| DispatchError::UnknownCommand(request.command.clone()))?;

        let requester_groups = self.groups.groups_of(&request.username);
        if !self
            .authorizer
            .evaluate(&descriptor.auth, &requester_groups)
        {
            tracing::info!(
                "Refusing {} to {} (strategy {})",
                request.command,
                request.username,
                descriptor.auth
            );
            return Err(DispatchError::Unauthorized {
                command: request.command,
                user: request.username,
            });
        }

        let job = self.store.create(request).await?;
        let guard = self.running.track(job.id, &cancel);

        tracing::info!(
            "Job {} started: {} by {}",
            job.id,
            job.request.command,
            job.request.username
        );

        match &descriptor.kind {
            CommandKind::Local(command) => {
                let ctx = CommandContext {
                    job: job.clone(),
                    cancel: guard.token().clone(),
                    registry: Arc::clone(&self.registry),
                    logs: Arc::clone(&self.logs),
                };
                let result = tokio::select! {
                    result = command.execute(ctx) => result,
                    _ = guard.token().cancelled() => {
                        return self.finish_cancelled(job.id).await;
                    }
                };
                self.finish_local(job.id, result).await
            }
            CommandKind::Shell(invocation) => {
                self.run_shell(&job, invocation, guard.token()).await
            }
            CommandKind::Remote => {
                self.run_remote(&job, &descriptor, guard.token()).await
            }
        }
    }

    async fn finish_local(
        &self,
        job_id: u64,
        result: std::result::Result<String, CommandError>,
    ) -> Result<Dispatched> {
        match result {
            Ok(output) => {
                self.store
                    .finish(job_id, JobStatus::Successful, None)
                    .await?;
                Ok(Dispatched { job_id, output })
            }
            Err(CommandError::Failed(message)) => {
                self.store
                    .finish(job_id, JobStatus::Failed, Some(message.clone()))
                    .await?;
                Err(DispatchError::Failed { job_id, message })
            }
            Err(CommandError::Errored(message)) => {
                self.store
                    .finish(job_id, JobStatus::Errored, Some(message.clone()))
                    .await?;
                Err(DispatchError::Errored { job_id, message })
            }
        }
    }

    async fn run_shell(
        &self,
        job: &Job,
        invocation: &ShellInvocation,
        cancel: &CancellationToken,
    ) -> Result<Dispatched> {
        let mut args = invocation.args.clone();
        args.extend(job.request.args.iter().cloned());

        let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let logs = Arc::clone(&self.logs);
        let job_id = job.id;
        let writer = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if let Err(e) = logs.append(job_id, line).await {
                    tracing::error!("Failed to append log for job {}: {}", job_id, e);
                }
            }
        });

        let outcome = shell::run(&invocation.program, &args, cancel, |line| {
            let _ = line_tx.send(line);
        })
        .await;

        drop(line_tx);
        if let Err(e) = writer.await {
            tracing::warn!("Log writer of job {} panicked: {}", job_id, e);
        }

        match outcome {
            ShellOutcome::Success { output } => self.finish_local(job_id, Ok(output)).await,
            ShellOutcome::Failure { error, .. } => {
                self.finish_local(job_id, Err(CommandError::Failed(error)))
                    .await
            }
            ShellOutcome::Errored { error } => {
                self.finish_local(job_id, Err(CommandError::Errored(error)))
                    .await
            }
            ShellOutcome::Cancelled { .. } => self.finish_cancelled(job_id).await,
        }
    }

    async fn run_remote(
        &self,
        job: &Job,
        descriptor: &CommandDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Dispatched> {
        let job_id = job.id;
        let mut signal = match self.pipeline.await_completion(job_id).await {
            Ok(signal) => signal,
            Err(e) => return self.finish_errored(job_id, e.to_string()).await,
        };

        if let Err(e) = self
            .pipeline
            .dispatch(Assignment::new(job_id, &job.request))
            .await
        {
            self.pipeline.abandon(job_id).await;
            let message = e.to_string();
            self.store
                .finish(job_id, JobStatus::Errored, Some(message.clone()))
                .await?;
            return Err(match e {
                PipelineError::NoWorkerAvailable(command) => {
                    DispatchError::NoWorkerAvailable(command)
                }
                PipelineError::WorkerBusy(token) => DispatchError::WorkerBusy(token),
                _ => DispatchError::Errored { job_id, message },
            });
        }

        let deadline = descriptor.timeout.unwrap_or(self.remote_timeout);

        tokio::select! {
            completion = &mut signal => self.remote_result(job_id, completion).await,
            _ = cancel.cancelled() => self.give_up(job_id, signal, "cancelled").await,
            _ = tokio::time::sleep(deadline) => self.give_up(job_id, signal, "timed out").await,
        }
    }

    /// Stops waiting for a remote job, unless its completion already won the race
    async fn give_up(
        &self,
        job_id: u64,
        signal: oneshot::Receiver<Completion>,
        reason: &str,
    ) -> Result<Dispatched> {
        if self.pipeline.abandon(job_id).await {
            tracing::info!("Remote job {} {}", job_id, reason);
            return self.finish_cancelled(job_id).await;
        }

        // The completion path removed the wait first and is delivering its result.
        self.remote_result(job_id, signal.await).await
    }

    async fn remote_result(
        &self,
        job_id: u64,
        completion: std::result::Result<Completion, oneshot::error::RecvError>,
    ) -> Result<Dispatched> {
        let Ok(completion) = completion else {
            return self
                .finish_errored(job_id, "completion signal dropped".to_string())
                .await;
        };

        let message = || completion.error.clone().unwrap_or_default();
        match completion.status {
            JobStatus::Successful => {
                let output = self.logs.read(job_id).await.map_err(StoreError::from)?;
                Ok(Dispatched {
                    job_id,
                    output: output.join("\n"),
                })
            }
            JobStatus::Failed => Err(DispatchError::Failed {
                job_id,
                message: message(),
            }),
            JobStatus::Cancelled => Err(DispatchError::Cancelled(job_id)),
            JobStatus::Errored | JobStatus::Running => Err(DispatchError::Errored {
                job_id,
                message: message(),
            }),
        }
    }

    async fn finish_cancelled(&self, job_id: u64) -> Result<Dispatched> {
        self.store
            .finish(job_id, JobStatus::Cancelled, None)
            .await?;
        Err(DispatchError::Cancelled(job_id))
    }

    async fn finish_errored(&self, job_id: u64, message: String) -> Result<Dispatched> {
        self.store
            .finish(job_id, JobStatus::Errored, Some(message.clone()))
            .await?;
        Err(DispatchError::Errored { job_id, message })
    }
}
