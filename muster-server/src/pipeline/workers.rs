//! Worker registry
//!
//! Connected workers in registration order. Selection walks the list round-robin so
//! that equally capable workers take turns.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use muster_core::domain::worker::Worker;
use muster_core::dto::protocol::ServerMessage;
use tokio::sync::mpsc;

pub(crate) struct WorkerConnection {
    pub(crate) token: String,
    pub(crate) connection_id: u64,
    pub(crate) capabilities: BTreeSet<String>,
    pub(crate) outbound: mpsc::Sender<ServerMessage>,
    pub(crate) in_flight: BTreeSet<u64>,
    pub(crate) connected_at: DateTime<Utc>,
}

impl WorkerConnection {
    pub(crate) fn summary(&self) -> Worker {
        Worker {
            token: self.token.clone(),
            capabilities: self.capabilities.iter().cloned().collect(),
            connected_at: self.connected_at,
            in_flight: self.in_flight.len(),
        }
    }
}

#[derive(Default)]
pub(crate) struct WorkerRegistry {
    connections: Vec<WorkerConnection>,
    cursor: usize,
}

impl WorkerRegistry {
    pub(crate) fn contains(&self, token: &str) -> bool {
        self.connections.iter().any(|c| c.token == token)
    }

    pub(crate) fn add(&mut self, connection: WorkerConnection) {
        self.connections.push(connection);
    }

    /// Removes the connection, only if it is still the one identified by `connection_id`
    pub(crate) fn remove(&mut self, token: &str, connection_id: u64) -> Option<WorkerConnection> {
        let idx = self
            .connections
            .iter()
            .position(|c| c.token == token && c.connection_id == connection_id)?;
        if idx < self.cursor {
            self.cursor -= 1;
        }
        Some(self.connections.remove(idx))
    }

    pub(crate) fn get_mut(&mut self, token: &str) -> Option<&mut WorkerConnection> {
        self.connections.iter_mut().find(|c| c.token == token)
    }

    /// The worker that currently has `job_id` in flight
    pub(crate) fn holding(&mut self, job_id: u64) -> Option<&mut WorkerConnection> {
        self.connections
            .iter_mut()
            .find(|c| c.in_flight.contains(&job_id))
    }

    /// Next worker, after the previously selected one, able to run `command`
    pub(crate) fn select(
        &mut self,
        command: &str,
        skip: Option<&str>,
    ) -> Option<&mut WorkerConnection> {
        let count = self.connections.len();
        let idx = (0..count)
            .map(|offset| (self.cursor + offset) % count)
            .find(|&idx| {
                let connection = &self.connections[idx];
                connection.capabilities.contains(command) && Some(connection.token.as_str()) != skip
            })?;
        self.cursor = idx + 1;
        Some(&mut self.connections[idx])
    }

    pub(crate) fn summaries(&self) -> Vec<Worker> {
        self.connections.iter().map(WorkerConnection::summary).collect()
    }
}
