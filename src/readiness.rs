//! Readiness handshake.
//!
//! An HTTP worker announces itself with exactly one line, `PORT:<n>`, on stdout. The first line is
//! parsed strictly: anything else is a startup bug and fails immediately, without retrying. For
//! HTTP endpoints the probe then polls a liveness request every `poll_interval` until the server
//! answers (any status counts) or the deadline passes. Connection refusals and request timeouts
//! during that window are expected; every other client error is a real fault and propagates.
//!
//! The deadline covers both stages. A first line longer than [`MAX_READINESS_LINE`] bytes is
//! malformed; only that prefix is ever buffered.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, info};
use vgi_matrix::{READINESS_PREFIX, ReadinessHandshake, TransportMode};

use crate::config::DEFAULT_POLL_INTERVAL;
use crate::errors::{HarnessError, HarnessResult};
use crate::worker::{WorkerProcess, spawn_line_drain};

pub const LOCALHOST: &str = "127.0.0.1";
/// Longest first line read from a worker's stdout.
pub const MAX_READINESS_LINE: u64 = 4096;
/// Upper bound on a single liveness request.
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// What "ready" means for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessKind {
    /// The readiness line alone.
    Line,
    /// The readiness line, then a successful liveness request to `path`.
    Http { path: String },
}

impl ReadinessKind {
    /// Readiness required by `transport`; `None` for transports without a handshake.
    pub fn for_transport(transport: TransportMode) -> Option<ReadinessKind> {
        match transport.handshake() {
            ReadinessHandshake::None => None,
            ReadinessHandshake::PortLine => Some(ReadinessKind::Http { path: "/".to_string() }),
        }
    }
}

/// Where a ready worker listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn local(port: u16) -> Self {
        Self {
            host: LOCALHOST.to_string(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url())
        } else {
            format!("{}/{path}", self.base_url())
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl ProbeSettings {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Port announced by a readiness line, or `None` if the line is malformed.
///
/// Only the line terminator is stripped; the rest must be `PORT:` followed by decimal digits
/// naming a non-zero port.
///
/// ## Examples
/// ```rust
/// use vgi_conformance::readiness::parse_readiness_line;
///
/// assert_eq!(parse_readiness_line("PORT:54321\n"), Some(54321));
/// assert_eq!(parse_readiness_line("Listening on 54321"), None);
/// assert_eq!(parse_readiness_line("PORT: 54321"), None);
/// ```
pub fn parse_readiness_line(line: &str) -> Option<u16> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    let digits = line.strip_prefix(READINESS_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u16>().ok().filter(|port| *port != 0)
}

/// Block until `process` is ready, returning its endpoint.
///
/// The process stays running on failure; callers stop it.
#[tracing::instrument(skip_all, fields(worker = %process.label(), kind = ?kind))]
pub async fn await_ready(
    process: &mut WorkerProcess,
    kind: &ReadinessKind,
    settings: ProbeSettings,
) -> HarnessResult<Endpoint> {
    let deadline = Instant::now() + settings.timeout;
    let command = process.command().to_string();
    let timed_out = |stage: &'static str| HarnessError::ReadinessTimeout {
        command: command.clone(),
        timeout: settings.timeout,
        stage,
    };

    let stdout = process.take_stdout().ok_or_else(|| HarnessError::Io {
        context: format!("worker `{command}` has no readiness channel"),
        source: std::io::Error::new(std::io::ErrorKind::NotConnected, "stdout already taken"),
    })?;
    let mut reader = BufReader::new(stdout);
    let mut raw = Vec::new();
    let mut first_line = (&mut reader).take(MAX_READINESS_LINE);
    let read = match tokio::time::timeout_at(deadline, first_line.read_until(b'\n', &mut raw)).await {
        Ok(read) => read.map_err(|e| HarnessError::io(format!("reading readiness line of `{command}`"), e))?,
        Err(_) => return Err(timed_out("readiness line")),
    };
    if read == 0 {
        return Err(process.early_exit().await);
    }
    let line = String::from_utf8_lossy(&raw).into_owned();
    let truncated = raw.len() as u64 == MAX_READINESS_LINE && !raw.ends_with(b"\n");
    let port = if truncated { None } else { parse_readiness_line(&line) };
    let Some(port) = port else {
        return Err(HarnessError::MalformedReadiness {
            command: command.clone(),
            line: line.trim_end().to_string(),
        });
    };
    // Keep draining so the worker never blocks on a full stdout pipe.
    spawn_line_drain(reader, process.label().to_string(), None);

    let endpoint = Endpoint::local(port);
    debug!(%endpoint, "readiness line received");

    if let ReadinessKind::Http { path } = kind {
        poll_liveness(process, &endpoint.url(path), deadline, settings.poll_interval, || {
            timed_out("liveness")
        })
        .await?;
    }

    info!(%endpoint, "worker ready");
    process.set_endpoint(endpoint.clone());
    Ok(endpoint)
}

async fn poll_liveness(
    process: &mut WorkerProcess,
    url: &str,
    deadline: Instant,
    poll_interval: Duration,
    timed_out: impl Fn() -> HarnessError,
) -> HarnessResult<()> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .build()
        .map_err(|source| HarnessError::Probe {
            url: url.to_string(),
            source,
        })?;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out());
        }
        let per_request = PROBE_REQUEST_TIMEOUT.min(deadline - now);
        match client.get(url).timeout(per_request).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "liveness probe answered");
                return Ok(());
            }
            Err(e) if e.is_connect() || e.is_timeout() => {
                debug!(error = %e, "worker not accepting connections yet");
            }
            Err(source) => {
                return Err(HarnessError::Probe {
                    url: url.to_string(),
                    source,
                });
            }
        }
        if process.try_exit().is_some() {
            return Err(process.early_exit().await);
        }
        if Instant::now() + poll_interval >= deadline {
            tokio::time::sleep_until(deadline).await;
            return Err(timed_out());
        }
        tokio::time::sleep(poll_interval).await;
    }
}
