//! Builtin commands
//!
//! In-process commands answering questions about the bot itself and the jobs it ran.
//! Each one runs as a job of its own, so listings leave out the invoking job.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use muster_core::domain::job::{Job, JobStatus};
use muster_core::dto::job::JobQuery;

use crate::repository::JobStore;
use crate::service::auth::{AuthStrategy, Groups};
use crate::service::registry::{
    CommandContext, CommandDescriptor, CommandError, CommandRegistry, LocalCommand,
};
use crate::service::running::RunningJobs;

pub const DEFAULT_LIMIT: usize = 5;
pub const NO_JOB_FOUND: &str = "no job could be found";

/// Shared state the builtins read from
#[derive(Clone)]
pub struct BuiltinDeps {
    pub store: Arc<JobStore>,
    pub groups: Arc<Groups>,
    pub running: Arc<RunningJobs>,
}

/// Registers every builtin command
pub fn register_builtins(registry: &mut CommandRegistry, deps: BuiltinDeps) {
    registry
        .register(
            CommandDescriptor::builtin("help", Help)
                .with_help("prints the configured commands, all of them with -all, or the help of one")
                .with_auth(AuthStrategy::Any),
        )
        .register(
            CommandDescriptor::builtin("version", Version)
                .with_help("prints the running version")
                .with_auth(AuthStrategy::Any),
        )
        .register(
            CommandDescriptor::builtin("groups", ListGroups(deps.clone()))
                .with_help("prints the configured groups")
                .with_auth(AuthStrategy::Any),
        )
        .register(
            CommandDescriptor::builtin("jobs", ListJobs(deps.clone()))
                .with_help("shows your latest jobs, use -limit to get more")
                .with_auth(AuthStrategy::Any),
        )
        .register(
            CommandDescriptor::builtin("audit", Audit(deps.clone()))
                .with_help("lists jobs of every user, filter with -user and -limit")
                .with_auth(AuthStrategy::Admins),
        )
        .register(
            CommandDescriptor::builtin("auditjob", AuditJob(deps.clone()))
                .with_help("shows the metadata of any job by id")
                .with_auth(AuthStrategy::Admins),
        )
        .register(
            CommandDescriptor::builtin("auditlogs", AuditLogs(deps.clone()))
                .with_help("prints the output of any job by id")
                .with_auth(AuthStrategy::Admins),
        )
        .register(
            CommandDescriptor::builtin("job", FindJob(deps.clone()))
                .with_help("shows one of your jobs")
                .with_auth(AuthStrategy::Any),
        )
        .register(
            CommandDescriptor::builtin("last", LastJob(deps.clone()))
                .with_help("shows your last job")
                .with_auth(AuthStrategy::Any),
        )
        .register(
            CommandDescriptor::builtin("logs", Logs(deps.clone()))
                .with_help("prints the output of one of your jobs")
                .with_auth(AuthStrategy::Any),
        )
        .register(
            CommandDescriptor::builtin("tail", Tail(deps.clone()))
                .with_help("prints the last lines of your last job, or of the given one")
                .with_auth(AuthStrategy::Any),
        )
        .register(
            CommandDescriptor::builtin("cancel", CancelJob(deps.clone()))
                .with_help("cancels one of your running jobs")
                .with_auth(AuthStrategy::Any),
        )
        .register(
            CommandDescriptor::builtin("kill", KillJob(deps))
                .with_help("cancels any running job")
                .with_auth(AuthStrategy::Admins),
        );
}

struct Help;

#[async_trait]
impl LocalCommand for Help {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let flags = Flags::parse(&ctx.job.request.args)?;
        if let Some(name) = flags.positional.first() {
            let command = ctx
                .registry
                .find(name)
                .ok_or_else(|| CommandError::failed(format!("no such command {}", name)))?;
            return Ok(format!("*{}* - {}\n", command.name, command.help));
        }

        Ok(ctx
            .registry
            .iter()
            .filter(|command| flags.all || !command.builtin)
            .map(|command| format!("- {}: {}\n", command.name, command.help))
            .collect())
    }
}

struct Version;

#[async_trait]
impl LocalCommand for Version {
    async fn execute(&self, _ctx: CommandContext) -> Result<String, CommandError> {
        Ok(format!("muster version {}", env!("CARGO_PKG_VERSION")))
    }
}

struct ListGroups(BuiltinDeps);

#[async_trait]
impl LocalCommand for ListGroups {
    async fn execute(&self, _ctx: CommandContext) -> Result<String, CommandError> {
        Ok(self
            .0
            .groups
            .iter()
            .map(|(group, users)| format!("- {}: {}\n", group, users.join(", ")))
            .collect())
    }
}

struct ListJobs(BuiltinDeps);

#[async_trait]
impl LocalCommand for ListJobs {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let flags = Flags::parse(&ctx.job.request.args)?;
        let jobs = past_jobs(
            &self.0.store,
            &ctx.job,
            Some(ctx.job.request.username.clone()),
            flags.limit.unwrap_or(DEFAULT_LIMIT),
        )
        .await?;
        Ok(format_jobs(&jobs, Utc::now()))
    }
}

struct Audit(BuiltinDeps);

#[async_trait]
impl LocalCommand for Audit {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let flags = Flags::parse(&ctx.job.request.args)?;
        let jobs = past_jobs(
            &self.0.store,
            &ctx.job,
            flags.user,
            flags.limit.unwrap_or(DEFAULT_LIMIT),
        )
        .await?;
        Ok(format_jobs(&jobs, Utc::now()))
    }
}

struct FindJob(BuiltinDeps);

#[async_trait]
impl LocalCommand for FindJob {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let id = job_id_arg(&ctx.job.request.args)?;
        let job = owned_job(&self.0.store, &ctx.job.request.username, id).await?;
        Ok(format_job(&job, Utc::now()))
    }
}

struct AuditJob(BuiltinDeps);

#[async_trait]
impl LocalCommand for AuditJob {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let id = job_id_arg(&ctx.job.request.args)?;
        let job = any_job(&self.0.store, id).await?;
        Ok(format_job(&job, Utc::now()))
    }
}

struct LastJob(BuiltinDeps);

#[async_trait]
impl LocalCommand for LastJob {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let job = last_job(&self.0.store, &ctx.job).await?;
        Ok(format_job(&job, Utc::now()))
    }
}

struct Logs(BuiltinDeps);

#[async_trait]
impl LocalCommand for Logs {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let id = job_id_arg(&ctx.job.request.args)?;
        let job = owned_job(&self.0.store, &ctx.job.request.username, id).await?;
        let lines = ctx.logs.read(job.id).await.map_err(errored)?;
        Ok(lines.join("\n"))
    }
}

struct AuditLogs(BuiltinDeps);

#[async_trait]
impl LocalCommand for AuditLogs {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let id = job_id_arg(&ctx.job.request.args)?;
        let job = any_job(&self.0.store, id).await?;
        let lines = ctx.logs.read(job.id).await.map_err(errored)?;
        Ok(lines.join("\n"))
    }
}

struct Tail(BuiltinDeps);

#[async_trait]
impl LocalCommand for Tail {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let flags = Flags::parse(&ctx.job.request.args)?;
        let job = match flags.positional.first() {
            Some(id) => {
                let id = parse_job_id(id)?;
                owned_job(&self.0.store, &ctx.job.request.username, id).await?
            }
            None => last_job(&self.0.store, &ctx.job).await?,
        };

        let lines = ctx.logs.read(job.id).await.map_err(errored)?;
        let keep = flags.limit.unwrap_or(DEFAULT_LIMIT);
        let start = lines.len().saturating_sub(keep);
        Ok(lines[start..].join("\n"))
    }
}

struct CancelJob(BuiltinDeps);

#[async_trait]
impl LocalCommand for CancelJob {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let id = job_id_arg(&ctx.job.request.args)?;
        let job = owned_job(&self.0.store, &ctx.job.request.username, id).await?;
        issue_cancel(&self.0.running, &job)
    }
}

struct KillJob(BuiltinDeps);

#[async_trait]
impl LocalCommand for KillJob {
    async fn execute(&self, ctx: CommandContext) -> Result<String, CommandError> {
        let id = job_id_arg(&ctx.job.request.args)?;
        let job = any_job(&self.0.store, id).await?;
        issue_cancel(&self.0.running, &job)
    }
}

fn issue_cancel(running: &RunningJobs, job: &Job) -> Result<String, CommandError> {
    if job.status != JobStatus::Running {
        return Err(CommandError::failed(format!(
            "job {} is already {}",
            job.id, job.status
        )));
    }

    if !running.cancel(job.id) {
        tracing::warn!("Job {} is running but has no cancellation handle", job.id);
    }
    Ok(format!("Issued command cancellation to job {}", job.id))
}

/// Flags accepted by the builtins: `-limit N`, `-limit=N`, `-user U` and the bare `-all`
#[derive(Debug, Default, PartialEq, Eq)]
struct Flags {
    all: bool,
    limit: Option<usize>,
    user: Option<String>,
    positional: Vec<String>,
}

impl Flags {
    fn parse(args: &[String]) -> Result<Self, CommandError> {
        let mut flags = Flags::default();
        let mut args = args.iter();

        while let Some(arg) = args.next() {
            let Some(flag) = arg.strip_prefix('-') else {
                flags.positional.push(arg.clone());
                continue;
            };

            let (name, inline) = match flag.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (flag, None),
            };
            if name == "all" && inline.is_none() {
                flags.all = true;
                continue;
            }

            let value = match inline {
                Some(value) => value,
                None => args
                    .next()
                    .cloned()
                    .ok_or_else(|| CommandError::failed(format!("flag -{} needs a value", name)))?,
            };

            match name {
                "limit" => {
                    let limit = value.parse().map_err(|_| {
                        CommandError::failed(format!("invalid limit {}", value))
                    })?;
                    flags.limit = Some(limit);
                }
                "user" => flags.user = Some(value),
                _ => return Err(CommandError::failed(format!("unknown flag -{}", name))),
            }
        }

        Ok(flags)
    }
}

fn errored(err: impl std::fmt::Display) -> CommandError {
    CommandError::errored(err.to_string())
}

fn parse_job_id(arg: &str) -> Result<u64, CommandError> {
    arg.parse()
        .map_err(|_| CommandError::failed(format!("invalid job id {}", arg)))
}

fn job_id_arg(args: &[String]) -> Result<u64, CommandError> {
    let arg = args
        .first()
        .ok_or_else(|| CommandError::failed("a job id is required"))?;
    parse_job_id(arg)
}

/// Newest jobs matching `user`, leaving out the invoking job
async fn past_jobs(
    store: &JobStore,
    current: &Job,
    user: Option<String>,
    limit: usize,
) -> Result<Vec<Job>, CommandError> {
    let jobs = store
        .query(&JobQuery { user, limit: None })
        .await
        .map_err(errored)?;
    Ok(jobs
        .into_iter()
        .filter(|job| job.id != current.id)
        .take(limit)
        .collect())
}

async fn last_job(store: &JobStore, current: &Job) -> Result<Job, CommandError> {
    past_jobs(store, current, Some(current.request.username.clone()), 1)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| CommandError::failed(NO_JOB_FOUND))
}

async fn any_job(store: &JobStore, id: u64) -> Result<Job, CommandError> {
    store
        .find(id)
        .await
        .map_err(errored)?
        .ok_or_else(|| CommandError::failed(NO_JOB_FOUND))
}

/// A job of `username`; other users' jobs are reported as missing
async fn owned_job(store: &JobStore, username: &str, id: u64) -> Result<Job, CommandError> {
    store
        .find(id)
        .await
        .map_err(errored)?
        .filter(|job| job.request.username == username)
        .ok_or_else(|| CommandError::failed(NO_JOB_FOUND))
}

fn format_jobs(jobs: &[Job], now: DateTime<Utc>) -> String {
    jobs.iter()
        .map(|job| {
            format!(
                "*{}* - {} - *{}* by *{}* in *{}* - *{}*\n",
                job.id,
                time_ago(job.start_time, now),
                job.request.command,
                job.request.username,
                location(job),
                job.status
            )
        })
        .collect()
}

fn format_job(job: &Job, now: DateTime<Utc>) -> String {
    let args: String = job
        .request
        .args
        .iter()
        .map(|arg| format!("\"{}\" ", arg))
        .collect();

    let mut out = format!(
        "* *ID* {}\n* *Status* {}\n* *Command* {}\n* *Args* {}\n* *Where* {}\n* *When* {}\n",
        job.id,
        job.status,
        job.request.command,
        args,
        location(job),
        time_ago(job.start_time, now)
    );
    if let Some(error) = &job.error_message {
        out.push_str(&format!("* *Error* {}\n", error));
    }
    out
}

fn location(job: &Job) -> &str {
    if job.request.is_im {
        "DM"
    } else {
        &job.request.channel_link
    }
}

fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(then);
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {} ago", unit)
        } else {
            format!("{} {}s ago", n, unit)
        }
    };

    match elapsed.num_seconds() {
        s if s < 60 => "now".to_string(),
        s if s < 3600 => plural(s / 60, "minute"),
        s if s < 86400 => plural(s / 3600, "hour"),
        s => plural(s / 86400, "day"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::repository::{InMemoryLogRepository, LogRepository};
    use crate::service::registry::CommandKind;
    use muster_core::domain::job::Request;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        deps: BuiltinDeps,
        registry: Arc<CommandRegistry>,
        logs: Arc<InMemoryLogRepository>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut members = BTreeMap::new();
            members.insert("admin".to_string(), vec!["admin_user".to_string()]);
            members.insert(
                "other".to_string(),
                vec!["user_one".to_string(), "user_two".to_string()],
            );
            let deps = BuiltinDeps {
                store: Arc::new(JobStore::in_memory()),
                groups: Arc::new(Groups::new(members)),
                running: Arc::new(RunningJobs::new()),
            };
            let mut registry = CommandRegistry::new();
            register_builtins(&mut registry, deps.clone());
            registry.register(
                CommandDescriptor::shell("echo", "echo", vec![])
                    .with_help("echoes its arguments")
                    .with_auth(AuthStrategy::Any),
            );
            Self {
                deps,
                registry: Arc::new(registry),
                logs: Arc::new(InMemoryLogRepository::new()),
            }
        }

        async fn create(&self, username: &str, is_im: bool) -> Job {
            self.deps
                .store
                .create(Request {
                    command: "command".to_string(),
                    args: vec!["arg1".to_string(), "arg2".to_string()],
                    channel: "general".to_string(),
                    channel_id: "123".to_string(),
                    channel_link: "<#123>".to_string(),
                    username: username.to_string(),
                    is_im,
                    ..Default::default()
                })
                .await
                .unwrap()
        }

        /// Runs a builtin as `username` from a job that is not in the store
        async fn run(&self, command: &str, username: &str, args: &[&str]) -> Result<String, CommandError> {
            let job = Job {
                id: 0,
                request: Request {
                    command: command.to_string(),
                    args: args.iter().map(|a| a.to_string()).collect(),
                    username: username.to_string(),
                    ..Default::default()
                },
                status: JobStatus::Running,
                start_time: Utc::now(),
                end_time: None,
                error_message: None,
            };
            self.run_as(job).await
        }

        async fn run_as(&self, job: Job) -> Result<String, CommandError> {
            let CommandKind::Local(builtin) = self.registry.find(&job.request.command).unwrap().kind.clone()
            else {
                panic!("{} is not a local command", job.request.command);
            };
            builtin
                .execute(CommandContext {
                    job,
                    cancel: CancellationToken::new(),
                    registry: Arc::clone(&self.registry),
                    logs: self.logs.clone(),
                })
                .await
        }
    }

    #[tokio::test]
    async fn test_version() {
        let fixture = Fixture::new();
        let out = fixture.run("version", "someone", &[]).await.unwrap();
        assert_eq!(out, format!("muster version {}", env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_help_lists_configured_commands() {
        let fixture = Fixture::new();
        let configured = fixture.run("help", "someone", &[]).await.unwrap();
        assert_eq!(configured, "- echo: echoes its arguments\n");

        let one = fixture.run("help", "someone", &["kill"]).await.unwrap();
        assert_eq!(one, "*kill* - cancels any running job\n");

        assert!(fixture.run("help", "someone", &["nope"]).await.is_err());
    }

    #[tokio::test]
    async fn test_help_all_includes_builtins() {
        let fixture = Fixture::new();
        let all = fixture.run("help", "someone", &["-all"]).await.unwrap();

        let names: Vec<&str> = all
            .lines()
            .filter_map(|line| line.strip_prefix("- "))
            .filter_map(|line| line.split(':').next())
            .collect();
        assert_eq!(
            names,
            vec![
                "audit", "auditjob", "auditlogs", "cancel", "echo", "groups", "help", "job",
                "jobs", "kill", "last", "logs", "tail", "version",
            ]
        );
        assert!(all.contains("- auditjob: shows the metadata of any job by id\n"));
    }

    #[tokio::test]
    async fn test_groups() {
        let fixture = Fixture::new();
        let out = fixture.run("groups", "someone", &[]).await.unwrap();
        assert_eq!(out, "- admin: admin_user\n- other: user_one, user_two\n");
    }

    #[tokio::test]
    async fn test_jobs_lists_own_jobs_with_limit() {
        let fixture = Fixture::new();
        fixture.create("someone", false).await;
        fixture.create("someone", false).await;
        fixture.create("someone_else", false).await;

        let out = fixture.run("jobs", "someone", &[]).await.unwrap();
        assert_eq!(
            out,
            "*2* - now - *command* by *someone* in *<#123>* - *Running*\n\
             *1* - now - *command* by *someone* in *<#123>* - *Running*\n"
        );

        let limited = fixture.run("jobs", "someone", &["-limit=1"]).await.unwrap();
        assert_eq!(limited, "*2* - now - *command* by *someone* in *<#123>* - *Running*\n");
    }

    #[tokio::test]
    async fn test_jobs_in_direct_message() {
        let fixture = Fixture::new();
        let job = fixture.create("someone", true).await;
        fixture
            .deps
            .store
            .finish(job.id, JobStatus::Successful, None)
            .await
            .unwrap();

        let out = fixture.run("jobs", "someone", &[]).await.unwrap();
        assert_eq!(out, "*1* - now - *command* by *someone* in *DM* - *Successful*\n");
    }

    #[tokio::test]
    async fn test_audit_filters_by_user() {
        let fixture = Fixture::new();
        for user in ["someone", "other", "someone", "someone", "other"] {
            fixture.create(user, false).await;
        }

        let out = fixture
            .run("audit", "admin_user", &["-user", "someone", "-limit", "2"])
            .await
            .unwrap();
        assert_eq!(
            out,
            "*4* - now - *command* by *someone* in *<#123>* - *Running*\n\
             *3* - now - *command* by *someone* in *<#123>* - *Running*\n"
        );

        let everyone = fixture.run("audit", "admin_user", &[]).await.unwrap();
        assert_eq!(everyone.lines().count(), 5);
    }

    #[tokio::test]
    async fn test_listing_leaves_out_invoking_job() {
        let fixture = Fixture::new();
        fixture.create("someone", false).await;
        let invocation = fixture
            .deps
            .store
            .create(Request {
                command: "jobs".to_string(),
                username: "someone".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let out = fixture.run_as(invocation).await.unwrap();
        assert_eq!(out, "*1* - now - *command* by *someone* in *<#123>* - *Running*\n");
    }

    #[tokio::test]
    async fn test_last_and_job() {
        let fixture = Fixture::new();
        for _ in 0..3 {
            fixture.create("someone", false).await;
        }

        let last = fixture.run("last", "someone", &[]).await.unwrap();
        assert_eq!(
            last,
            "* *ID* 3\n* *Status* Running\n* *Command* command\n* *Args* \"arg1\" \"arg2\" \n* *Where* <#123>\n* *When* now\n"
        );

        let first = fixture.run("job", "someone", &["1"]).await.unwrap();
        assert!(first.starts_with("* *ID* 1\n"));

        let err = fixture.run("job", "someone_else", &["1"]).await.unwrap_err();
        assert_eq!(err, CommandError::failed(NO_JOB_FOUND));
    }

    #[tokio::test]
    async fn test_logs_and_tail() {
        let fixture = Fixture::new();
        let first = fixture.create("someone", false).await;
        fixture
            .logs
            .append(first.id, "something to say 1".to_string())
            .await
            .unwrap();
        let second = fixture.create("someone", false).await;
        for line in ["a", "b", "something to say 2"] {
            fixture.logs.append(second.id, line.to_string()).await.unwrap();
        }

        assert_eq!(
            fixture.run("logs", "someone", &["1"]).await.unwrap(),
            "something to say 1"
        );
        assert_eq!(
            fixture.run("tail", "someone", &["-limit", "1"]).await.unwrap(),
            "something to say 2"
        );
        assert_eq!(
            fixture.run("tail", "someone", &["2"]).await.unwrap(),
            "a\nb\nsomething to say 2"
        );
    }

    #[tokio::test]
    async fn test_auditjob_and_auditlogs_reach_any_job() {
        let fixture = Fixture::new();
        let job = fixture.create("someone", false).await;
        fixture
            .logs
            .append(job.id, "something to say".to_string())
            .await
            .unwrap();

        // Owner-only lookups hide the job from other users
        assert!(fixture.run("logs", "admin_user", &["1"]).await.is_err());

        let meta = fixture.run("auditjob", "admin_user", &["1"]).await.unwrap();
        assert_eq!(
            meta,
            "* *ID* 1\n* *Status* Running\n* *Command* command\n* *Args* \"arg1\" \"arg2\" \n* *Where* <#123>\n* *When* now\n"
        );
        assert_eq!(
            fixture.run("auditlogs", "admin_user", &["1"]).await.unwrap(),
            "something to say"
        );

        let err = fixture.run("auditjob", "admin_user", &["9"]).await.unwrap_err();
        assert_eq!(err, CommandError::failed(NO_JOB_FOUND));
        assert!(fixture.run("auditlogs", "admin_user", &[]).await.is_err());
    }

    #[test]
    fn test_audit_builtins_are_admin_only() {
        let fixture = Fixture::new();
        for name in ["audit", "auditjob", "auditlogs", "kill"] {
            let descriptor = fixture.registry.find(name).unwrap();
            assert_eq!(descriptor.auth, AuthStrategy::Admins, "{}", name);
            assert!(descriptor.builtin);
        }
    }

    #[tokio::test]
    async fn test_cancel_own_running_job() {
        let fixture = Fixture::new();
        fixture.create("someone", false).await;
        let job = fixture.create("someone", false).await;
        let guard = fixture.deps.running.track(job.id, &CancellationToken::new());

        let out = fixture.run("cancel", "someone", &["2"]).await.unwrap();
        assert_eq!(out, "Issued command cancellation to job 2");
        assert!(guard.token().is_cancelled());

        let err = fixture.run("cancel", "someone_else", &["2"]).await.unwrap_err();
        assert_eq!(err.to_string(), NO_JOB_FOUND);
    }

    #[tokio::test]
    async fn test_kill_any_job() {
        let fixture = Fixture::new();
        let job = fixture.create("someone", false).await;
        let guard = fixture.deps.running.track(job.id, &CancellationToken::new());

        let out = fixture.run("kill", "admin_user", &["1"]).await.unwrap();
        assert_eq!(out, "Issued command cancellation to job 1");
        assert!(guard.token().is_cancelled());

        fixture
            .deps
            .store
            .finish(job.id, JobStatus::Cancelled, None)
            .await
            .unwrap();
        assert!(fixture.run("kill", "admin_user", &["1"]).await.is_err());
    }

    #[test]
    fn test_flags() {
        let args: Vec<String> = ["-limit=3", "-user", "bob", "7"]
            .iter()
            .map(|a| a.to_string())
            .collect();
        let flags = Flags::parse(&args).unwrap();
        assert_eq!(flags.limit, Some(3));
        assert_eq!(flags.user.as_deref(), Some("bob"));
        assert_eq!(flags.positional, vec!["7".to_string()]);
        assert!(!flags.all);

        let flags = Flags::parse(&["-all".to_string(), "help".to_string()]).unwrap();
        assert!(flags.all);
        assert_eq!(flags.positional, vec!["help".to_string()]);

        assert!(Flags::parse(&["-limit".to_string()]).is_err());
        assert!(Flags::parse(&["-limit=x".to_string()]).is_err());
        assert!(Flags::parse(&["-color=red".to_string()]).is_err());
    }

    #[test]
    fn test_time_ago() {
        let now = Utc::now();
        assert_eq!(time_ago(now, now), "now");
        assert_eq!(time_ago(now - chrono::Duration::minutes(1), now), "1 minute ago");
        assert_eq!(time_ago(now - chrono::Duration::hours(5), now), "5 hours ago");
        assert_eq!(time_ago(now - chrono::Duration::days(2), now), "2 days ago");
    }
}
