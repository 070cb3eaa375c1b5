//! Muster server
//!
//! Runs chat commands as tracked jobs, in-process or on connected workers.

pub mod api;
pub mod config;
pub mod pipeline;
pub mod repository;
pub mod service;

use std::sync::Arc;

use api::AppState;
use config::{CommandsFile, Config};
use pipeline::RemotePipeline;
use repository::{InMemoryLogRepository, InMemoryRecordStore, JobStore, LogRepository};
use service::builtins::{self, BuiltinDeps};
use service::{CommandRegistry, Dispatcher, RunningJobs, StrategyAuthorizer};

/// Wires stores, registry, pipeline and dispatcher together
pub async fn build_state(config: &Config, commands: CommandsFile) -> anyhow::Result<AppState> {
    let store = Arc::new(JobStore::open(Arc::new(InMemoryRecordStore::new())).await?);
    let logs: Arc<dyn LogRepository> = Arc::new(InMemoryLogRepository::new());
    let groups = Arc::new(commands.groups.clone());
    let running = Arc::new(RunningJobs::new());

    let mut registry = CommandRegistry::new();
    builtins::register_builtins(
        &mut registry,
        BuiltinDeps {
            store: store.clone(),
            groups: groups.clone(),
            running: running.clone(),
        },
    );
    commands.register_into(&mut registry);
    tracing::info!("{} commands registered", registry.len());

    let pipeline = Arc::new(RemotePipeline::new(
        store.clone(),
        logs.clone(),
        config.pipeline(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        logs.clone(),
        Arc::new(registry),
        Arc::new(StrategyAuthorizer),
        groups,
        pipeline.clone(),
        running,
        config.dispatch_timeout,
    ));

    Ok(AppState {
        store,
        logs,
        dispatcher,
        pipeline,
    })
}
