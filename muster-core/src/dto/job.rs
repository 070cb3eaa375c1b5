//! Job DTOs for the HTTP API

use serde::{Deserialize, Serialize};

/// Filter for listing jobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobQuery {
    /// Only jobs requested by this username
    pub user: Option<String>,
    /// Maximum number of jobs to return
    pub limit: Option<usize>,
}

/// Result of running a command through the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub job_id: u64,
    pub output: String,
}
