//! Worker wire protocol
//!
//! Messages exchanged over the persistent connection between the server and a remote
//! agent. Each message travels as one JSON text frame, tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobStatus, Request};

/// Messages sent by an agent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// First message on every connection
    Register(Registration),
    /// One line of output produced by an assigned job
    Log { job_id: u64, line: String },
    /// Terminal status of an assigned job
    Finish(FinishReport),
}

/// Messages sent by the server to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted, the connection is active
    Registered { token: String },
    /// Registration refused, the server closes the connection after this
    Rejected { reason: String },
    /// Run a command for a job
    Assign(Assignment),
    /// Stop working on a job, its result is no longer awaited
    Cancel { job_id: u64 },
    /// Idle keepalive
    Ping,
}

/// Agent identity and the commands it can run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub token: String,
    pub capabilities: Vec<String>,
}

/// A command handed to an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub job_id: u64,
    pub command: String,
    pub args: Vec<String>,
    pub request: Request,
}

impl Assignment {
    pub fn new(job_id: u64, request: &Request) -> Self {
        Self {
            job_id,
            command: request.command.clone(),
            args: request.args.clone(),
            request: request.clone(),
        }
    }
}

/// Completion of a job, reported by the agent that ran it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishReport {
    pub job_id: u64,
    pub status: JobStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl FinishReport {
    pub fn successful(job_id: u64) -> Self {
        Self {
            job_id,
            status: JobStatus::Successful,
            error: None,
        }
    }

    pub fn failed(job_id: u64, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn errored(job_id: u64, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status: JobStatus::Errored,
            error: Some(error.into()),
        }
    }

    pub fn cancelled(job_id: u64) -> Self {
        Self {
            job_id,
            status: JobStatus::Cancelled,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_messages_are_tagged() {
        let message = AgentMessage::Finish(FinishReport::failed(7, "exit status 1"));
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "finish");
        assert_eq!(json["job_id"], 7);
        assert_eq!(json["status"], "Failed");
        assert_eq!(json["error"], "exit status 1");
    }

    #[test]
    fn test_register_from_raw_json() {
        let raw = r#"{"type":"register","token":"agent-1","capabilities":["deploy","uptime"]}"#;
        let message: AgentMessage = serde_json::from_str(raw).unwrap();

        assert_eq!(
            message,
            AgentMessage::Register(Registration {
                token: "agent-1".to_string(),
                capabilities: vec!["deploy".to_string(), "uptime".to_string()],
            })
        );
    }

    #[test]
    fn test_finish_without_error_field() {
        let raw = r#"{"type":"finish","job_id":3,"status":"Successful"}"#;
        let message: AgentMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message, AgentMessage::Finish(FinishReport::successful(3)));
    }

    #[test]
    fn test_assignment_copies_request() {
        let request = Request {
            command: "deploy".to_string(),
            args: vec!["prod".to_string()],
            username: "someone".to_string(),
            ..Default::default()
        };

        let assignment = Assignment::new(42, &request);
        assert_eq!(assignment.job_id, 42);
        assert_eq!(assignment.command, "deploy");
        assert_eq!(assignment.args, vec!["prod".to_string()]);
        assert_eq!(assignment.request, request);

        let ping = serde_json::to_string(&ServerMessage::Ping).unwrap();
        assert_eq!(ping, r#"{"type":"ping"}"#);
    }
}
