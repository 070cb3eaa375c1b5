//! Shell command runner
//!
//! Runs a program with arguments, streaming every stdout/stderr line to a sink while it
//! runs. Used by the server for shell commands and by agents for assigned jobs.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a shell invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellOutcome {
    /// Exit status zero
    Success { output: String },
    /// The program ran but exited with a non-zero status
    Failure { output: String, error: String },
    /// The program could not be run at all
    Errored { error: String },
    /// The cancellation token fired before the program exited
    Cancelled { output: String },
}

/// Runs `program` with `args`, feeding each output line to `sink`.
///
/// The child is killed when `cancel` fires or when the returned future is dropped.
pub async fn run<F>(
    program: &str,
    args: &[String],
    cancel: &CancellationToken,
    mut sink: F,
) -> ShellOutcome
where
    F: FnMut(String) + Send,
{
    debug!("Running {} {:?}", program, args);

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return ShellOutcome::Errored {
                error: format!("failed to start {}: {}", program, e),
            };
        }
    };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return ShellOutcome::Errored {
            error: format!("failed to capture output of {}", program),
        };
    };

    let mut stdout = Some(OutputLines::new(stdout));
    let mut stderr = Some(OutputLines::new(stderr));
    let mut lines = Vec::new();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", program, e);
                }
                return ShellOutcome::Cancelled { output: lines.join("\n") };
            }
            line = next_line(&mut stdout) => {
                if !forward_line(line, program, &mut sink, &mut lines) {
                    stdout = None;
                }
            }
            line = next_line(&mut stderr) => {
                if !forward_line(line, program, &mut sink, &mut lines) {
                    stderr = None;
                }
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", program, e);
            }
            return ShellOutcome::Cancelled { output: lines.join("\n") };
        }
        status = child.wait() => status,
    };

    let output = lines.join("\n");
    match status {
        Ok(status) if status.success() => ShellOutcome::Success { output },
        Ok(status) => ShellOutcome::Failure {
            output,
            error: format!("{} {}", program, status),
        },
        Err(e) => ShellOutcome::Errored {
            error: format!("failed to wait for {}: {}", program, e),
        },
    }
}

/// Hands a read line to the sink, false once the stream is finished
fn forward_line<F>(
    line: std::io::Result<Option<String>>,
    program: &str,
    sink: &mut F,
    lines: &mut Vec<String>,
) -> bool
where
    F: FnMut(String),
{
    match line {
        Ok(Some(line)) => {
            sink(line.clone());
            lines.push(line);
            true
        }
        Ok(None) => false,
        Err(e) => {
            // Dropping the pipe keeps a chatty child from blocking on a full buffer.
            warn!("Failed to read output of {}: {}", program, e);
            false
        }
    }
}

/// Newline-delimited output, invalid UTF-8 replaced rather than rejected
struct OutputLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OutputLines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Cancel safe: a partially read line stays in `buf` for the next call.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let mut raw = std::mem::take(&mut self.buf);
        if raw.last() == Some(&b'\n') {
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }
}

/// Next line of a stream, pending forever once the stream is gone
async fn next_line<R: AsyncRead + Unpin>(
    stream: &mut Option<OutputLines<R>>,
) -> std::io::Result<Option<String>> {
    match stream {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}
