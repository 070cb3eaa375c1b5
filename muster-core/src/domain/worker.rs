//! Worker domain model
//!
//! Represents a remote agent currently connected to the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A connected worker as seen from the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Identity presented by the worker when registering
    pub token: String,

    /// Command names this worker declared it can run
    pub capabilities: Vec<String>,

    /// When the current connection was registered
    pub connected_at: DateTime<Utc>,

    /// Number of jobs assigned to this worker that have not finished yet
    pub in_flight: usize,
}
