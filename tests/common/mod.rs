//! Shared fixtures for the integration tests.
//!
//! Every test gets its own throwaway worker checkout under the system temp directory, and a
//! config that points each runtime and the bundler at the `vgi-mock-worker` binary.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use vgi_conformance::HarnessConfig;
use vgi_conformance::vgi_matrix::COMBINATIONS;

pub const MOCK_WORKER: &str = env!("CARGO_BIN_EXE_vgi-mock-worker");

/// A worker checkout holding every entry point the combinations name. Removed on drop.
pub struct WorkerDir {
    dir: TempDir,
}

impl WorkerDir {
    pub fn new(name: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix(&format!("vgi-conformance-{name}-"))
            .tempdir()
            .unwrap();
        let dir = Self { dir };
        for info in COMBINATIONS {
            dir.write_entry(info.entry, "// conformance worker\n");
        }
        dir
    }

    /// Make the worker started from `entry` misbehave (see `vgi-mock-worker`).
    pub fn with_behavior(self, entry: &str, behavior: &str) -> Self {
        self.write_entry(entry, &format!("// conformance worker\n// mock-behavior: {behavior}\n"));
        self
    }

    pub fn write_entry(&self, entry: &str, source: &str) {
        let path = self.dir.path().join(entry);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, source).unwrap();
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> HarnessConfig {
        HarnessConfig::for_worker_dir(self.path())
            .with_all_executables(MOCK_WORKER)
            .with_ready_timeout(Duration::from_secs(5))
            .with_stop_timeout(Duration::from_secs(2))
    }
}

/// Whether a process with `pid` still exists (zombies included).
#[cfg(unix)]
pub fn pid_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn pid_exists(_pid: u32) -> bool {
    false
}

// =============================================================================
// Test connector
// =============================================================================

use std::sync::Mutex;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vgi_conformance::matrix::{
    Binding, ConnectError, HttpTarget, LogLevel, LogRecord, LogSubscription, ServiceConnector, SharedPipe,
};

/// Speaks the mock worker's line protocol over pipes and its route table over HTTP.
#[derive(Default)]
pub struct MockConnector {
    subscriptions: Mutex<Vec<LogSubscription>>,
}

impl MockConnector {
    /// Log subscriptions handed out so far, in connect order.
    pub fn subscriptions(&self) -> Vec<LogSubscription> {
        self.subscriptions.lock().unwrap().clone()
    }
}

pub enum MockTransport {
    Pipe(SharedPipe),
    Http { http: reqwest::Client, target: HttpTarget },
}

pub struct MockClient {
    transport: MockTransport,
    logs: LogSubscription,
}

impl ServiceConnector for MockConnector {
    type Client = MockClient;

    async fn connect(&self, binding: Binding, logs: LogSubscription) -> Result<MockClient, ConnectError> {
        self.subscriptions.lock().unwrap().push(logs.clone());
        let transport = match binding {
            Binding::Pipe(pipe) => MockTransport::Pipe(pipe),
            Binding::Http(target) => MockTransport::Http {
                http: reqwest::Client::builder()
                    .no_proxy()
                    .build()
                    .map_err(|e| ConnectError::Client(e.to_string()))?,
                target,
            },
        };
        Ok(MockClient { transport, logs })
    }
}

impl MockClient {
    /// Compression the client was asked to use; `None` over pipes.
    pub fn compression_level(&self) -> Option<u32> {
        match &self.transport {
            MockTransport::Pipe(_) => None,
            MockTransport::Http { target, .. } => Some(target.compression_level),
        }
    }

    /// Send one command; `Err` carries the worker's error text.
    pub async fn call(&mut self, command: &str) -> Result<String, String> {
        let reply = match &self.transport {
            MockTransport::Pipe(pipe) => pipe_call(pipe, command).await?,
            MockTransport::Http { http, target } => http_call(http, target, command).await?,
        };

        let mut lines: Vec<&str> = reply.lines().collect();
        let last = lines.pop().unwrap_or_default().to_string();
        for line in lines {
            if let Some(message) = line.strip_prefix("LOG INFO ") {
                self.logs.emit(LogRecord {
                    level: LogLevel::Info,
                    message: message.to_string(),
                });
            }
        }
        match last.strip_prefix("ERR ") {
            Some(error) => Err(error.to_string()),
            None => Ok(last),
        }
    }
}

async fn pipe_call(pipe: &SharedPipe, command: &str) -> Result<String, String> {
    let mut channel = pipe.lock().await;
    channel
        .write_all(format!("{command}\n").as_bytes())
        .await
        .map_err(|e| e.to_string())?;
    channel.flush().await.map_err(|e| e.to_string())?;

    // One command, one reply: whatever arrives belongs to this call.
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = channel.read(&mut chunk).await.map_err(|e| e.to_string())?;
        if n == 0 {
            return Err("worker closed the pipe".to_string());
        }
        buf.extend_from_slice(&chunk[..n]);
        if reply_complete(&buf) {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
    }
}

fn reply_complete(buf: &[u8]) -> bool {
    let Some(body) = buf.strip_suffix(b"\n") else {
        return false;
    };
    let last = body.rsplit(|b| *b == b'\n').next().unwrap_or_default();
    !last.starts_with(b"LOG ")
}

async fn http_call(http: &reqwest::Client, target: &HttpTarget, command: &str) -> Result<String, String> {
    let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
    let request = match name {
        "produce_error_on_init" | "exchange_error_on_init" => http.post(format!("{}/{name}", target.base_url)),
        "large" => http.get(format!("{}/large/{arg}", target.base_url)),
        _ => http.get(format!("{}/{name}", target.base_url)),
    };
    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    let body = response.text().await.map_err(|e| e.to_string())?;
    if status.is_success() {
        Ok(body)
    } else {
        Ok(format!("ERR {body}"))
    }
}
