//! API Module
//!
//! HTTP API layer for the server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod worker;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::pipeline::RemotePipeline;
use crate::repository::{JobStore, LogRepository};
use crate::service::Dispatcher;

/// Shared handles every handler can reach
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub logs: Arc<dyn LogRepository>,
    pub dispatcher: Arc<Dispatcher>,
    pub pipeline: Arc<RemotePipeline>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Command execution
        .route("/execute", post(job::execute))
        // Job endpoints
        .route("/jobs", get(job::list_jobs))
        .route("/job/{id}", get(job::get_job))
        .route("/job/{id}/logs", get(job::get_job_logs))
        // Worker endpoints
        .route("/workers", get(worker::list_workers))
        .route("/agent", get(worker::agent_socket))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
