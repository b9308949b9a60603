//! External command execution with timeouts and output capture.
//!
//! Every tool invocation a stage makes goes through a [`Runner`]. The
//! production [`CommandRunner`] spawns the program in its own process group
//! (see [`crate::process_guard`]), buffers stdout and stderr, and enforces
//! an optional timeout by killing the whole group and reaping the leader.
//!
//! Failures never surface as a separate error channel: a process that
//! could not be launched, could not be waited on, or ran out of time comes
//! back as a [`CommandResult`] with status [`SENTINEL_STATUS`] and a
//! human-readable reason in `stderr`. Callers check one shape. Output that
//! is not valid UTF-8 is reported the same way rather than rewritten.

use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::process_guard::{ChildRegistry, CommandProcessGroup, kill_process_group};

/// Status reported when a command did not run to completion
pub const SENTINEL_STATUS: i32 = -1;

/// Reason text carried by a timed-out command
pub const TIMEOUT_REASON: &str = "Command timed out";

/// Offset added to the signal number of a child killed by a signal
pub const SIGNAL_EXIT_BASE: i32 = 128;

/// Reason prefix for output that is not valid UTF-8
pub const NON_UTF8_REASON: &str = "Command produced non-UTF-8 output";

/// A fully described command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    argv: Vec<String>,
    working_dir: Option<PathBuf>,
    /// Added on top of the inherited environment
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
    capture_output: bool,
}

impl CommandSpec {
    /// Describe a command; the first element is the executable
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout: None,
            capture_output: true,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Let the child write straight to the installer's stdout/stderr
    pub fn without_capture(mut self) -> Self {
        self.capture_output = false;
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn captures_output(&self) -> bool {
        self.capture_output
    }

    /// Space-joined argv for logs and progress details
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Outcome of one command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, `128 + signal` if killed by a signal, or [`SENTINEL_STATUS`]
    pub status: i32,
    pub stdout: String,
    /// Captured stderr, or the failure reason for sentinel results
    pub stderr: String,
}

impl CommandResult {
    /// Result for a command that did not run to completion
    pub fn sentinel(reason: impl Into<String>) -> Self {
        Self {
            status: SENTINEL_STATUS,
            stdout: String::new(),
            stderr: reason.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn is_sentinel(&self) -> bool {
        self.status == SENTINEL_STATUS
    }

    pub fn timed_out(&self) -> bool {
        self.is_sentinel() && self.stderr == TIMEOUT_REASON
    }
}

/// Anything that can execute a [`CommandSpec`]
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> CommandResult;
}

/// Runs commands on the host
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    dry_run: bool,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self { dry_run: false }
    }

    /// A runner that logs commands instead of spawning them and reports
    /// every one as successful
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[async_trait]
impl Runner for CommandRunner {
    async fn run(&self, spec: &CommandSpec) -> CommandResult {
        if self.dry_run {
            tracing::info!("[dry-run] would execute: {}", spec.display());
            return CommandResult {
                status: 0,
                stdout: String::new(),
                stderr: String::new(),
            };
        }
        run_command(spec).await
    }
}

/// Spawn `spec`, wait for it (bounded by its timeout) and collect output
pub async fn run_command(spec: &CommandSpec) -> CommandResult {
    let Some((program, args)) = spec.argv.split_first() else {
        tracing::error!("Refusing to run an empty command");
        return CommandResult::sentinel("Empty command");
    };

    tracing::debug!("Running command: {}", spec.display());

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .in_new_process_group();
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    if spec.capture_output {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!("Failed to launch {}: {}", program, e);
            return CommandResult::sentinel(format!("Failed to launch {}: {}", program, e));
        }
    };

    // Present until the child is reaped
    let pid = child.id();
    if let Some(pid) = pid {
        ChildRegistry::track(pid);
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let waited = match spec.timeout {
        Some(limit) => tokio::time::timeout(limit, wait_with_output(&mut child, stdout, stderr))
            .await
            .ok(),
        None => Some(wait_with_output(&mut child, stdout, stderr).await),
    };

    let result = match waited {
        Some(Ok((status, out, err))) => {
            let code = exit_code(status);
            tracing::debug!("Command completed with return code: {}", code);
            match (String::from_utf8(out), String::from_utf8(err)) {
                (Ok(stdout), Ok(stderr)) => CommandResult {
                    status: code,
                    stdout,
                    stderr,
                },
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!("Command {} wrote non-UTF-8 output: {}", spec.display(), e);
                    CommandResult::sentinel(format!(
                        "{} (exit status {}): {}",
                        NON_UTF8_REASON,
                        code,
                        e.utf8_error()
                    ))
                }
            }
        }
        Some(Err(e)) => {
            tracing::error!("Error running command {}: {}", spec.display(), e);
            terminate(&mut child, pid).await;
            CommandResult::sentinel(format!("Failed waiting for {}: {}", program, e))
        }
        None => {
            tracing::error!("Command timed out: {}", spec.display());
            terminate(&mut child, pid).await;
            CommandResult::sentinel(TIMEOUT_REASON)
        }
    };

    if let Some(pid) = pid {
        ChildRegistry::untrack(pid);
    }

    result
}

/// Wait for exit while draining both pipes, so a chatty child cannot
/// block on a full pipe
async fn wait_with_output(
    child: &mut Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let (status, out, err) = tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
    Ok((status?, out?, err?))
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Kill the child's process group and block until the leader is reaped
async fn terminate(child: &mut Child, pid: Option<u32>) {
    let group_killed = pid
        .map(|pid| kill_process_group(pid, Signal::SIGKILL).is_ok())
        .unwrap_or(false);
    if !group_killed {
        if let Err(e) = child.start_kill() {
            tracing::warn!("Failed to kill child process: {}", e);
        }
    }
    if let Err(e) = child.wait().await {
        tracing::warn!("Failed to reap child process: {}", e);
    }
}

/// Exit code, or `128 + signal` for signal deaths like a shell reports them
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| {
        status
            .signal()
            .map(|s| SIGNAL_EXIT_BASE + s)
            .unwrap_or(SENTINEL_STATUS)
    })
}
