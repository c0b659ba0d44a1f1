//! Child-process execution with a hard wall-clock timeout.

use crate::error::{Error, Result};
use crate::sanitize::SanitizedTarget;
use serde::{Deserialize, Serialize};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Placeholder substituted with the sanitized target when rendering a template.
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Program plus argument list; any argument may contain `{target}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandTemplate { program: program.into(), args: args.into_iter().map(Into::into).collect() }
    }

    pub fn render(&self, target: &SanitizedTarget) -> Vec<String> {
        self.args.iter().map(|a| a.replace(TARGET_PLACEHOLDER, target.as_str())).collect()
    }

    /// Render and run in one step.
    pub async fn run(&self, target: &SanitizedTarget, limit: Duration) -> Result<Captured> {
        run_captured(&self.program, &self.render(target), limit).await
    }
}

/// Whatever the process produced before it exited or was killed.
#[derive(Debug, Default)]
pub struct Captured {
    pub stdout_lines: Vec<String>,
    pub stderr: String,
    /// `None` when the process was killed on timeout.
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl Captured {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }

    /// Error text for a process that ran to completion with a nonzero exit.
    pub fn exit_failure(&self) -> Option<String> {
        let status = self.status?;
        if status.success() {
            return None;
        }
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            Some(format!("exited with {}", status))
        } else {
            Some(format!("exited with {}: {}", status, stderr))
        }
    }

    pub fn stdout_text(&self) -> String {
        self.stdout_lines.join("\n")
    }
}

/// How long pipe readers may keep going after the process itself has exited.
/// Descendants that inherited stdout would otherwise hold the run open.
pub const PIPE_GRACE: Duration = Duration::from_millis(250);

/// Spawn `program`, collect stdout line by line and stderr in full, and kill
/// its process group if it outlives `limit`. Lines read before a timeout are
/// kept.
///
/// Completion is the program's own exit; anything it left running in the
/// background is killed once the pipes have had [`PIPE_GRACE`] to drain.
/// Only a spawn or wait failure is an `Err`; timeouts and nonzero exits are
/// reported through [`Captured`].
pub async fn run_captured(program: &str, args: &[String], limit: Duration) -> Result<Captured> {
    let started = Instant::now();
    debug!(program, ?args, timeout_ms = limit.as_millis() as u64, "spawning");
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    let mut child = cmd
        .spawn()
        .map_err(|e| Error::ScanProcess(format!("failed to spawn {}: {}", program, e)))?;
    let pid = child.id();

    let stdout_lines = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        readers.push(tokio::spawn(read_lines(out, stdout_lines.clone())));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(tokio::spawn(read_all(err, stderr_buf.clone())));
    }

    let mut captured = Captured::default();
    match timeout(limit, child.wait()).await {
        Ok(Ok(status)) => captured.status = Some(status),
        Ok(Err(e)) => {
            kill_group(pid);
            let _ = child.kill().await;
            settle(readers, PIPE_GRACE).await;
            return Err(Error::ScanProcess(format!("{}: {}", program, e)));
        }
        Err(_) => {
            captured.timed_out = true;
            kill_group(pid);
            if let Err(e) = child.kill().await {
                warn!(program, error = %e, "failed to kill timed out process");
            }
        }
    }
    if !settle(readers, PIPE_GRACE).await {
        debug!(program, "output still open after exit; killing leftovers");
        kill_group(pid);
    }

    captured.stdout_lines = take(&stdout_lines);
    captured.stderr = String::from_utf8_lossy(&take(&stderr_buf)).into_owned();
    captured.elapsed = started.elapsed();
    Ok(captured)
}

async fn read_lines(out: ChildStdout, sink: Arc<Mutex<Vec<String>>>) {
    let mut segments = BufReader::new(out).split(b'\n');
    while let Ok(Some(seg)) = segments.next_segment().await {
        let line = String::from_utf8_lossy(&seg).trim_end_matches('\r').to_string();
        if let Ok(mut lines) = sink.lock() {
            lines.push(line);
        }
    }
}

async fn read_all(mut err: ChildStderr, sink: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 4096];
    while let Ok(n) = err.read(&mut chunk).await {
        if n == 0 {
            break;
        }
        if let Ok(mut buf) = sink.lock() {
            buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Wait up to `grace` for the readers to hit EOF, aborting the rest.
/// Returns whether all of them finished on their own.
async fn settle(mut readers: Vec<JoinHandle<()>>, grace: Duration) -> bool {
    let all = async {
        for r in readers.iter_mut() {
            let _ = r.await;
        }
    };
    if timeout(grace, all).await.is_ok() {
        return true;
    }
    for r in &readers {
        r.abort();
    }
    false
}

fn take<T>(shared: &Mutex<Vec<T>>) -> Vec<T> {
    shared.lock().map(|mut v| std::mem::take(&mut *v)).unwrap_or_default()
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // SAFETY: kill(2) with a negative pid signals the group created at spawn; no memory is shared.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
