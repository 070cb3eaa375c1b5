//! Worker connection loop
//!
//! Drives one worker connection through `Registering -> Active -> Closed`. The loop
//! waits on whichever comes first: an assignment to forward, a message from the
//! worker, the heartbeat tick or server shutdown.

use async_trait::async_trait;
use muster_core::dto::protocol::{AgentMessage, ServerMessage};
use thiserror::Error;
use tokio::time::{self, MissedTickBehavior};

use super::{PipelineError, RemotePipeline, WorkerSession};

/// Transport level failure
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed: {0}")]
    Closed(String),

    /// A message that could not be decoded; the connection stays usable
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Server to worker half of a connection
#[async_trait]
pub trait WorkerSink: Send {
    async fn send(&mut self, message: ServerMessage) -> Result<(), TransportError>;
}

/// Worker to server half of a connection
///
/// `recv` must be cancel safe: the loop drops it whenever another branch wins.
#[async_trait]
pub trait WorkerStream: Send {
    /// Next message, None once the worker closed the connection
    async fn recv(&mut self) -> Option<Result<AgentMessage, TransportError>>;
}

impl RemotePipeline {
    /// Serves a freshly opened connection until it closes
    ///
    /// The first message must be a registration. Refused registrations are answered
    /// with `Rejected` before returning the error.
    pub async fn accept<S, R>(&self, mut sink: S, mut stream: R) -> Result<(), PipelineError>
    where
        S: WorkerSink,
        R: WorkerStream,
    {
        let first = time::timeout(self.config.registration_timeout, stream.recv()).await;

        let registration = match first {
            Ok(Some(Ok(AgentMessage::Register(registration)))) => registration,
            Ok(Some(Ok(_))) => {
                return Err(reject(&mut sink, "expected a registration message").await);
            }
            Ok(Some(Err(e))) => {
                return Err(reject(&mut sink, &e.to_string()).await);
            }
            Ok(None) => {
                return Err(PipelineError::HandshakeFailed(
                    "connection closed before registering".to_string(),
                ));
            }
            Err(_) => {
                return Err(reject(&mut sink, "registration timed out").await);
            }
        };

        let session = match self.register(registration).await {
            Ok(session) => session,
            Err(e) => {
                let _ = sink
                    .send(ServerMessage::Rejected {
                        reason: e.to_string(),
                    })
                    .await;
                return Err(e);
            }
        };

        self.serve(session, sink, stream).await;
        Ok(())
    }

    async fn serve<S, R>(&self, mut session: WorkerSession, mut sink: S, mut stream: R)
    where
        S: WorkerSink,
        R: WorkerStream,
    {
        let token = session.token.clone();

        let registered = ServerMessage::Registered {
            token: token.clone(),
        };
        if let Err(e) = sink.send(registered).await {
            tracing::warn!("Worker {} went away while registering: {}", token, e);
            self.close(&token, session.connection_id).await;
            return;
        }

        let mut heartbeat = time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutting down connection of worker {}", token);
                    break;
                }
                outbound = session.recv() => {
                    let Some(message) = outbound else {
                        break;
                    };
                    if let Err(e) = sink.send(message).await {
                        tracing::warn!("Failed to forward to worker {}: {}", token, e);
                        break;
                    }
                }
                incoming = stream.recv() => match incoming {
                    Some(Ok(AgentMessage::Finish(report))) => self.report(&token, report).await,
                    Some(Ok(AgentMessage::Log { job_id, line })) => {
                        self.append_log(&token, job_id, line).await
                    }
                    Some(Ok(AgentMessage::Register(_))) => {
                        tracing::warn!("Worker {} sent a second registration, ignoring", token);
                    }
                    Some(Err(TransportError::Malformed(e))) => {
                        tracing::warn!("Dropping malformed message from worker {}: {}", token, e);
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Connection to worker {} failed: {}", token, e);
                        break;
                    }
                    None => {
                        tracing::debug!("Worker {} closed the connection", token);
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = sink.send(ServerMessage::Ping).await {
                        tracing::warn!("Worker {} missed a heartbeat: {}", token, e);
                        break;
                    }
                }
            }
        }

        self.close(&token, session.connection_id).await;
    }
}

async fn reject<S: WorkerSink>(sink: &mut S, reason: &str) -> PipelineError {
    let _ = sink
        .send(ServerMessage::Rejected {
            reason: reason.to_string(),
        })
        .await;
    PipelineError::HandshakeFailed(reason.to_string())
}
