//! Command Registry
//!
//! Maps command names to what running them means. Built once at startup and only read
//! afterwards, so it is shared behind an `Arc` without locking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use muster_core::domain::job::Job;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::repository::LogRepository;
use crate::service::auth::AuthStrategy;

/// Why a command did not complete successfully
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The command ran and reported a failure
    #[error("{0}")]
    Failed(String),

    /// The command could not run properly
    #[error("{0}")]
    Errored(String),
}

impl CommandError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self::Errored(message.into())
    }
}

/// Everything an in-process command gets to run with
pub struct CommandContext {
    /// The job this invocation runs as
    pub job: Job,
    /// Fires when the invocation is cancelled
    pub cancel: CancellationToken,
    /// The registry the command was resolved from
    pub registry: Arc<CommandRegistry>,
    /// Output store for the job
    pub logs: Arc<dyn LogRepository>,
}

/// A command executed inside the server process
#[async_trait]
pub trait LocalCommand: Send + Sync {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError>;
}

/// A program run on the server host, request arguments appended to `args`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInvocation {
    pub program: String,
    pub args: Vec<String>,
}

/// How a command is executed
#[derive(Clone)]
pub enum CommandKind {
    Local(Arc<dyn LocalCommand>),
    Shell(ShellInvocation),
    /// Runs on a connected worker that advertises the command name
    Remote,
}

impl std::fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::Local(_) => write!(f, "Local"),
            CommandKind::Shell(invocation) => f.debug_tuple("Shell").field(invocation).finish(),
            CommandKind::Remote => write!(f, "Remote"),
        }
    }
}

/// Registered command
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub name: String,
    pub help: String,
    pub auth: AuthStrategy,
    /// How long a remote dispatch may wait, the server default applies when unset
    pub timeout: Option<Duration>,
    pub kind: CommandKind,
    /// Shipped with the server rather than configured, hidden from plain `help`
    pub builtin: bool,
}

impl CommandDescriptor {
    pub fn local(name: impl Into<String>, command: impl LocalCommand + 'static) -> Self {
        Self::new(name, CommandKind::Local(Arc::new(command)))
    }

    pub fn builtin(name: impl Into<String>, command: impl LocalCommand + 'static) -> Self {
        Self {
            builtin: true,
            ..Self::local(name, command)
        }
    }

    pub fn shell(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(
            name,
            CommandKind::Shell(ShellInvocation {
                program: program.into(),
                args,
            }),
        )
    }

    pub fn remote(name: impl Into<String>) -> Self {
        Self::new(name, CommandKind::Remote)
    }

    fn new(name: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            auth: AuthStrategy::default(),
            timeout: None,
            kind,
            builtin: false,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn with_auth(mut self, auth: AuthStrategy) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, CommandKind::Remote)
    }
}

/// Name to descriptor map
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<CommandDescriptor>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a command, replacing any previous one with the same name
    pub fn register(&mut self, descriptor: CommandDescriptor) -> &mut Self {
        if self.commands.contains_key(&descriptor.name) {
            tracing::warn!("Command {} registered twice, keeping the last one", descriptor.name);
        }
        self.commands
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        self
    }

    pub fn find(&self, name: &str) -> Option<Arc<CommandDescriptor>> {
        self.commands.get(name).cloned()
    }

    /// Every command, in name order
    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
