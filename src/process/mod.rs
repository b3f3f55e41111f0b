//! Subprocess runner with captured output and a hard wall-clock timeout.
//!
//! [`run_command`] spawns one child, feeds it optional stdin, collects
//! stdout/stderr in memory and waits for it to exit.  When the timeout
//! fires first the child receives a graceful termination signal and the
//! result is flagged `timed_out`.  Every wait after that point is bounded:
//! a child that ignores the signal, or a descendant still holding the
//! output pipes, never keeps the call open; whatever was captured so far
//! is returned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a timed-out child gets to exit after SIGTERM.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);
/// How long output pipes may stay open once the child is gone.
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Everything needed to launch one child process.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Working directory for the child.
    pub cwd: PathBuf,
    /// Text piped to the child's stdin.  Empty or `None` closes stdin
    /// immediately.
    pub stdin: Option<String>,
    pub timeout: Duration,
    /// Complete environment of the child.  `None` inherits the parent's
    /// environment unchanged.
    pub env: Option<HashMap<String, String>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            stdin: None,
            timeout: Duration::from_secs(120),
            env: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: Option<String>) -> Self {
        self.stdin = input;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the child's whole environment with `env`.
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }
}

/// Outcome of a child that was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    /// `None` when the child was ended by a signal or never exited.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Failures that prevent an [`InvocationResult`] from existing at all.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Snapshot of the current process environment as an owned map.
///
/// Entries whose name or value is not valid UTF-8 are skipped.
pub fn inherited_env() -> HashMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                debug!(key = ?key, "skipping non-UTF-8 environment entry");
                None
            }
        })
        .collect()
}

/// Spawn `spec.program`, capture its output and wait for it to exit.
///
/// Spawn failures are returned as [`RunError::Spawn`]; every child that
/// started produces an [`InvocationResult`], including timeouts and
/// non-zero exits.  No retries happen here.
pub async fn run_command(spec: CommandSpec) -> Result<InvocationResult, RunError> {
    let program = spec.program.display().to_string();

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(env) = &spec.env {
        command.env_clear().envs(env);
    }
    let mut child = command.spawn().map_err(|source| RunError::Spawn {
        program: program.clone(),
        source,
    })?;

    debug!(program = %program, pid = ?child.id(), cwd = %spec.cwd.display(), "child spawned");

    let stdin_task = feed_stdin(&mut child, spec.stdin);
    let stdout = child.stdout.take().map(OutputCollector::spawn);
    let stderr = child.stderr.take().map(OutputCollector::spawn);

    let mut timed_out = false;
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = tokio::time::sleep(spec.timeout) => {
            timed_out = true;
            warn!(program = %program, timeout_secs = spec.timeout.as_secs_f64(), "child timed out; sending SIGTERM");
            terminate(&mut child);
            match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                Ok(status) => Some(status),
                Err(_) => {
                    warn!(program = %program, "child still running after SIGTERM; leaving it behind");
                    None
                }
            }
        }
    };

    // Join every helper before returning so nothing outlives the call.
    if let Some(mut task) = stdin_task {
        if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
            task.abort();
        }
    }
    let stdout = finish_output(stdout).await;
    let stderr = finish_output(stderr).await;

    let exit_code = match waited {
        Some(status) => {
            let status = status.map_err(|source| RunError::Wait {
                program: program.clone(),
                source,
            })?;
            status.code()
        }
        None => None,
    };

    debug!(program = %program, ?exit_code, timed_out, "child finished");

    Ok(InvocationResult {
        exit_code,
        stdout,
        stderr,
        timed_out,
    })
}

/// Write the optional input and close the pipe.  With no input the pipe
/// is dropped right away so the child sees EOF.
fn feed_stdin(child: &mut Child, input: Option<String>) -> Option<JoinHandle<()>> {
    let mut pipe = child.stdin.take()?;
    let input = input.filter(|s| !s.is_empty())?;
    Some(tokio::spawn(async move {
        if let Err(e) = pipe.write_all(input.as_bytes()).await {
            debug!(error = %e, "stdin write failed (child may have exited)");
        }
        let _ = pipe.shutdown().await;
    }))
}

/// Reads one output pipe into a shared buffer, so the bytes received so
/// far survive the reader being cut off.
struct OutputCollector {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl OutputCollector {
    fn spawn<R>(mut reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!(error = %e, "output pipe read failed");
                        break;
                    }
                }
            }
        });
        Self { buf, task }
    }

    /// Wait up to [`DRAIN_GRACE`] for EOF, then take what was read.
    async fn finish(mut self) -> String {
        if tokio::time::timeout(DRAIN_GRACE, &mut self.task).await.is_err() {
            debug!("output pipe still open after child exit; keeping partial output");
            self.task.abort();
        }
        let bytes = std::mem::take(&mut *self.buf.lock().unwrap_or_else(|e| e.into_inner()));
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

async fn finish_output(collector: Option<OutputCollector>) -> String {
    match collector {
        Some(collector) => collector.finish().await,
        None => String::new(),
    }
}

/// Request graceful termination.  No SIGKILL follow-up.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a pid we spawned and have not reaped.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == -1 {
            debug!(pid, error = %std::io::Error::last_os_error(), "SIGTERM delivery failed");
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}
