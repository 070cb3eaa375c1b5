//! Agent configuration
//!
//! Defines the configurable parameters of the agent: its identity, the server it
//! connects to, the commands it offers and how many of them may run at once.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;

/// Program run for an advertised command, assignment arguments appended to `args`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTarget {
    pub program: String,
    pub args: Vec<String>,
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Token this agent registers under; must be unique among connected agents
    pub token: String,

    /// WebSocket endpoint of the server (e.g., "ws://localhost:8080/agent")
    pub server_url: String,

    /// Advertised command names and what they run
    pub commands: BTreeMap<String, CommandTarget>,

    /// Max jobs running at once, further assignments wait for a free slot
    pub max_parallel_jobs: usize,

    /// Pause before reconnecting after the server went away
    pub reconnect_delay: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(token: String, server_url: String) -> Self {
        Self {
            token,
            server_url,
            commands: BTreeMap::new(),
            max_parallel_jobs: 2,
            reconnect_delay: Duration::from_secs(1),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - AGENT_TOKEN (optional, default: a generated `agent-<uuid>`)
    /// - SERVER_URL (required)
    /// - AGENT_COMMANDS (required, `name=program args,other=program`)
    /// - MAX_PARALLEL_JOBS (optional, default: 2)
    pub fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("AGENT_TOKEN")
            .ok()
            .filter(|token| !token.is_empty())
            .unwrap_or_else(generate_token);

        let server_url = std::env::var("SERVER_URL")
            .map_err(|_| anyhow::anyhow!("SERVER_URL environment variable not set"))?;

        let commands = std::env::var("AGENT_COMMANDS")
            .map_err(|_| anyhow::anyhow!("AGENT_COMMANDS environment variable not set"))?;

        let defaults = Self::new(token, server_url);
        let max_parallel_jobs =
            parse_var::<usize>("MAX_PARALLEL_JOBS", std::env::var("MAX_PARALLEL_JOBS").ok())?
                .unwrap_or(defaults.max_parallel_jobs);

        Ok(Self {
            commands: parse_commands(&commands)?,
            max_parallel_jobs,
            ..defaults
        })
    }

    /// Adds an advertised command
    #[allow(dead_code)]
    pub fn with_command(mut self, name: &str, program: &str, args: &[&str]) -> Self {
        self.commands.insert(
            name.to_string(),
            CommandTarget {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
        );
        self
    }

    /// Command names sent when registering
    pub fn capabilities(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token.trim().is_empty() {
            anyhow::bail!("token cannot be empty");
        }

        if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            anyhow::bail!("server_url must start with ws:// or wss://");
        }

        if self.commands.is_empty() {
            anyhow::bail!("at least one command must be configured");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(generate_token(), "ws://localhost:8080/agent".to_string())
    }
}

fn generate_token() -> String {
    format!("agent-{}", uuid::Uuid::new_v4())
}

/// Parses an optional variable, reporting values that do not parse
fn parse_var<T>(name: &str, value: Option<String>) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{} has an invalid value: {}", name, value)),
        None => Ok(None),
    }
}

/// Parses `name=program args,name2=program2` into command targets
fn parse_commands(raw: &str) -> anyhow::Result<BTreeMap<String, CommandTarget>> {
    let mut commands = BTreeMap::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((name, invocation)) = entry.split_once('=') else {
            anyhow::bail!("command {} is missing its program", entry);
        };

        let mut words = invocation.split_whitespace().map(String::from);
        let Some(program) = words.next() else {
            anyhow::bail!("command {} has an empty program", name);
        };

        commands.insert(
            name.trim().to_string(),
            CommandTarget {
                program,
                args: words.collect(),
            },
        );
    }

    Ok(commands)
}
