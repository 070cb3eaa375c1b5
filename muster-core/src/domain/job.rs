//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single command invocation as received from the chat side.
///
/// Immutable once a job has been created for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_link: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub user_link: String,
    /// Whether the request came through a direct message instead of a channel
    #[serde(default)]
    pub is_im: bool,
}

/// Job record
///
/// One per command invocation. Created by the server when a request is dispatched and
/// finished exactly once, either locally or on behalf of a remote worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub request: Request,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    /// Whether the job already reached a terminal status
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Successful,
    Failed,
    Errored,
    Cancelled,
}

impl JobStatus {
    /// `Running` is the only status a job can leave.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Whether a job finished with this status carries an error message
    pub fn carries_error(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Errored)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Successful => write!(f, "Successful"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Errored => write!(f, "Errored"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_is_non_terminal() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Successful.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Errored.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_error_carrying_statuses() {
        assert!(JobStatus::Failed.carries_error());
        assert!(JobStatus::Errored.carries_error());
        assert!(!JobStatus::Successful.carries_error());
        assert!(!JobStatus::Cancelled.carries_error());
    }

    #[test]
    fn test_request_defaults_when_deserializing() {
        let request: Request = serde_json::from_str(r#"{"command":"deploy"}"#).unwrap();
        assert_eq!(request.command, "deploy");
        assert!(request.args.is_empty());
        assert!(!request.is_im);
    }
}
