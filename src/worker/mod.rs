//! Worker process lifecycle.
//!
//! [`WorkerLauncher::start`] spawns one worker and wires its standard streams for the transport:
//!
//! - pipe transports: stdin/stdout are the protocol channel, stderr is drained into `tracing`.
//! - HTTP transports: stdin is closed, stdout carries the `PORT:<n>` readiness line (taken by
//!   [`crate::readiness::await_ready`]), stderr is drained into `tracing`.
//!
//! Diagnostics never share a stream with protocol bytes.
//!
//! [`WorkerProcess::stop`] closes stdin, sends SIGTERM and waits a bounded time. A worker that
//! outlives the bound is killed and reported as [`HarnessError::TeardownTimeout`].

pub mod command;

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vgi_matrix::{TransportClass, TransportMode};

pub use command::{WorkerCommand, find_executable, is_available};

use crate::errors::{HarnessError, HarnessResult};
use crate::readiness::Endpoint;
use crate::stats::SessionStats;

const STDERR_TAIL_LINES: usize = 40;
/// How long an exit report waits for the process and its stderr drain.
const EXIT_REPORT_GRACE: Duration = Duration::from_secs(1);

/// Last lines a worker wrote on stderr, kept for error reports.
#[derive(Debug, Clone, Default)]
pub struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn text(&self) -> String {
        let lines = self.0.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// Spawns workers and counts them.
#[derive(Debug, Clone, Default)]
pub struct WorkerLauncher {
    stats: Arc<SessionStats>,
}

impl WorkerLauncher {
    pub fn new(stats: Arc<SessionStats>) -> Self {
        Self { stats }
    }

    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }

    /// Start a worker for `transport`.
    ///
    /// Fails fast with the launch command when the program cannot be spawned. A worker that
    /// exits during startup is caught by [`WorkerProcess::await_startup`] or by readiness.
    #[tracing::instrument(skip_all, fields(transport = %transport, command = %command))]
    pub async fn start(&self, command: WorkerCommand, transport: TransportMode) -> HarnessResult<WorkerProcess> {
        let pipe = transport.class() == TransportClass::ProcessPipe;
        let mut cmd = command.to_tokio();
        cmd.stdin(if pipe { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| HarnessError::Launch {
            command: command.to_string(),
            source,
        })?;
        self.stats.record_launch();
        let pid = child.id().unwrap_or_default();
        info!(pid, "worker started");

        let label = format!("{}#{pid}", command.program);
        let tail = StderrTail::default();
        let stderr_drain = child
            .stderr
            .take()
            .map(|stderr| spawn_line_drain(stderr, label.clone(), Some(tail.clone())));

        Ok(WorkerProcess {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            command,
            transport,
            child,
            pid,
            label,
            tail,
            stderr_drain,
            endpoint: None,
            stats: Arc::clone(&self.stats),
            stopped: false,
        })
    }
}

/// One running worker. Exclusively owned; dropped without [`WorkerProcess::stop`] it is killed.
#[derive(Debug)]
pub struct WorkerProcess {
    command: WorkerCommand,
    transport: TransportMode,
    child: Child,
    pid: u32,
    label: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    tail: StderrTail,
    stderr_drain: Option<JoinHandle<()>>,
    endpoint: Option<Endpoint>,
    stats: Arc<SessionStats>,
    stopped: bool,
}

impl WorkerProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    pub fn transport(&self) -> TransportMode {
        self.transport
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub(crate) fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// The readiness side channel. Available once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// The protocol channel of a pipe-transport worker. Available once.
    pub fn take_pipe(&mut self) -> Option<(ChildStdin, ChildStdout)> {
        match (self.stdin.take(), self.stdout.take()) {
            (Some(input), Some(output)) => Some((input, output)),
            (input, output) => {
                self.stdin = input;
                self.stdout = output;
                None
            }
        }
    }

    pub fn stderr_tail(&self) -> String {
        self.tail.text()
    }

    /// Exit status if the worker has already exited.
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    pub fn is_running(&mut self) -> bool {
        self.try_exit().is_none()
    }

    /// Give a worker without a readiness handshake `grace` to fail.
    ///
    /// Any exit inside the window is an [`HarnessError::EarlyExit`]: a pipe worker only exits
    /// once its input closes, and the harness still holds it.
    pub async fn await_startup(&mut self, grace: Duration) -> HarnessResult<()> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Err(_) => Ok(()),
            Ok(_) => Err(self.early_exit().await),
        }
    }

    /// Build an [`HarnessError::EarlyExit`] for a worker that went away during startup.
    pub(crate) async fn early_exit(&mut self) -> HarnessError {
        let status = match tokio::time::timeout(EXIT_REPORT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.mark_stopped();
                status.to_string()
            }
            Ok(Err(e)) => format!("status unavailable: {e}"),
            Err(_) => "closed its output but is still running".to_string(),
        };
        if let Some(drain) = self.stderr_drain.take() {
            let _ = tokio::time::timeout(EXIT_REPORT_GRACE, drain).await;
        }
        HarnessError::EarlyExit {
            command: self.command.to_string(),
            status,
            stderr: self.tail.text(),
        }
    }

    /// Stop the worker: close stdin, SIGTERM, then wait at most `timeout`.
    #[tracing::instrument(skip_all, fields(pid = self.pid, worker = %self.label))]
    pub async fn stop(&mut self, timeout: Duration) -> HarnessResult<()> {
        if self.stopped {
            return Ok(());
        }
        drop(self.stdin.take());

        if let Some(status) = self.try_exit() {
            debug!(%status, "worker already exited");
            self.mark_stopped();
            return Ok(());
        }

        self.terminate();
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "worker stopped");
                self.mark_stopped();
                Ok(())
            }
            Ok(Err(source)) => {
                let _ = self.child.start_kill();
                self.mark_stopped();
                Err(HarnessError::io(format!("waiting for worker {}", self.pid), source))
            }
            Err(_) => {
                warn!(?timeout, "worker ignored SIGTERM; killing");
                let _ = self.child.kill().await;
                self.mark_stopped();
                Err(HarnessError::TeardownTimeout {
                    command: self.command.to_string(),
                    pid: self.pid,
                    timeout,
                })
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(self.pid) else {
            let _ = self.child.start_kill();
            return;
        };
        if let Err(errno) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            debug!(%errno, "SIGTERM not delivered");
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        let _ = self.child.start_kill();
    }

    fn mark_stopped(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stats.record_stop();
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if !self.stopped {
            warn!(pid = self.pid, worker = %self.label, "worker dropped without stop; killing");
            let _ = self.child.start_kill();
            self.mark_stopped();
        }
    }
}

/// Forward every line of `stream` to `tracing`, optionally keeping a tail.
pub(crate) fn spawn_line_drain<R>(stream: R, label: String, tail: Option<StderrTail>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(target: "vgi_conformance::worker", worker = %label, "{line}");
                    if let Some(tail) = &tail {
                        tail.push(line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(target: "vgi_conformance::worker", worker = %label, error = %e, "stream closed");
                    break;
                }
            }
        }
    })
}
