//! Server configuration
//!
//! Defines the configurable parameters of the server: bind address, remote dispatch
//! timing, worker queue sizing and the optional commands file.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::pipeline::PipelineConfig;
use crate::service::auth::{AuthStrategy, Groups};
use crate::service::registry::{CommandDescriptor, CommandRegistry};

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP and worker endpoints listen on
    pub bind_addr: String,

    /// How long a remote dispatch waits for its worker unless the command overrides it
    pub dispatch_timeout: Duration,

    /// Assignments queued per worker before it is reported busy
    pub outbound_capacity: usize,

    /// Interval of the keepalive sent to idle workers
    pub heartbeat_interval: Duration,

    /// JSON file declaring groups and configured commands
    pub commands_file: Option<PathBuf>,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - MUSTER_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - MUSTER_DISPATCH_TIMEOUT (optional, seconds, default: 300)
    /// - MUSTER_OUTBOUND_CAPACITY (optional, default: 32)
    /// - MUSTER_HEARTBEAT_INTERVAL (optional, seconds, default: 5)
    /// - MUSTER_COMMANDS_FILE (optional)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = std::env::var("MUSTER_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let dispatch_timeout = env_parse::<u64>("MUSTER_DISPATCH_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.dispatch_timeout);

        let outbound_capacity =
            env_parse::<usize>("MUSTER_OUTBOUND_CAPACITY")?.unwrap_or(defaults.outbound_capacity);

        let heartbeat_interval = env_parse::<u64>("MUSTER_HEARTBEAT_INTERVAL")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.heartbeat_interval);

        let commands_file = std::env::var("MUSTER_COMMANDS_FILE")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            bind_addr,
            dispatch_timeout,
            outbound_capacity,
            heartbeat_interval,
            commands_file,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.dispatch_timeout.is_zero() {
            anyhow::bail!("dispatch_timeout must be greater than 0");
        }

        if self.outbound_capacity == 0 {
            anyhow::bail!("outbound_capacity must be greater than 0");
        }

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            outbound_capacity: self.outbound_capacity,
            heartbeat_interval: self.heartbeat_interval,
            ..Default::default()
        }
    }

    /// Reads the commands file, an empty file set when none is configured
    pub fn load_commands(&self) -> anyhow::Result<CommandsFile> {
        let Some(path) = &self.commands_file else {
            return Ok(CommandsFile::default());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read commands file {}", path.display()))?;
        CommandsFile::parse(&raw)
            .with_context(|| format!("invalid commands file {}", path.display()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            dispatch_timeout: Duration::from_secs(300),
            outbound_capacity: 32,
            heartbeat_interval: Duration::from_secs(5),
            commands_file: None,
        }
    }
}

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{} has an invalid value: {}", name, value)),
        Err(_) => Ok(None),
    }
}

/// Groups and commands declared in the commands file
#[derive(Debug, Default, Deserialize)]
pub struct CommandsFile {
    #[serde(default)]
    pub groups: Groups,
    #[serde(default)]
    pub commands: BTreeMap<String, CommandConfig>,
}

impl CommandsFile {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let file: CommandsFile = serde_json::from_str(raw)?;
        for (name, command) in &file.commands {
            command.validate(name)?;
        }
        Ok(file)
    }

    /// Adds every declared command to `registry`
    pub fn register_into(&self, registry: &mut CommandRegistry) {
        for (name, command) in &self.commands {
            registry.register(command.descriptor(name));
        }
    }
}

/// Where a configured command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// On the server host
    Shell,
    /// On a worker advertising the command
    Remote,
}

/// One configured command
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    #[serde(rename = "type")]
    pub kind: CommandType,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub auth: AuthStrategy,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl CommandConfig {
    fn validate(&self, name: &str) -> anyhow::Result<()> {
        if self.kind == CommandType::Shell && self.cmd.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("shell command {} needs a cmd", name);
        }

        if self.timeout_seconds == Some(0) {
            anyhow::bail!("timeout_seconds of {} must be greater than 0", name);
        }

        Ok(())
    }

    pub fn descriptor(&self, name: &str) -> CommandDescriptor {
        let descriptor = match self.kind {
            CommandType::Shell => CommandDescriptor::shell(
                name,
                self.cmd.clone().unwrap_or_default(),
                self.args.clone(),
            ),
            CommandType::Remote => CommandDescriptor::remote(name),
        };

        let descriptor = descriptor
            .with_help(self.help.clone())
            .with_auth(self.auth.clone());

        match self.timeout_seconds {
            Some(seconds) => descriptor.with_timeout(Duration::from_secs(seconds)),
            None => descriptor,
        }
    }
}
