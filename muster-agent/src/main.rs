//! Muster Agent
//!
//! A remote worker that runs commands on behalf of the Muster server.
//!
//! Architecture:
//! - Configuration: Load settings from environment variables
//! - Session: WebSocket connection, registration and message loop
//! - Executor: Runs assigned commands as local programs and reports back
//!
//! The agent keeps one connection open, reconnecting with exponential backoff
//! whenever the server goes away.

mod config;
mod executor;
mod session;

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::session::Session;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "muster_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Muster Agent");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        "Loaded configuration: token={}, server_url={}",
        config.token, config.server_url
    );
    for (name, target) in &config.commands {
        info!("  - {} -> {} {:?}", name, target.program, target.args);
    }

    loop {
        let session = connect_with_retry(&config).await?;

        tokio::select! {
            result = session.run(&config) => match result {
                Ok(()) => info!("Session ended, reconnecting"),
                Err(e) => warn!("Session failed: {:#}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }

        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Connects and registers with the server, retrying with exponential backoff
///
/// This handles the case where the server may not be ready yet when the agent
/// starts (common in container environments).
async fn connect_with_retry(config: &Config) -> Result<Session> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match Session::connect(config).await {
            Ok(session) => {
                if attempt > 1 {
                    info!("Connected to server after {} attempt(s)", attempt);
                }
                return Ok(session);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Failed to connect to server after {} attempts", MAX_RETRIES);
                    return Err(e.context("Failed to register with server"));
                }

                warn!(
                    "Failed to connect to server (attempt {}/{}): {:#}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
