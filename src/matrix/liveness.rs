//! A protocol-free connector.
//!
//! `LivenessConnector` opens clients that can only check their worker is reachable: an HTTP
//! binding answers a `GET /` (any status), a pipe binding still has its input open and its output
//! has not reached end of file. It is what `vgi-conformance check` drives through the matrix when
//! no RPC client library is plugged in.

use std::time::Duration;

use tokio::io::AsyncReadExt;

use super::connector::{Binding, ConnectError, HttpTarget, LogSubscription, ServiceConnector, SharedPipe};

/// How long a pipe check listens for end of file before calling the worker alive.
const PIPE_EOF_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct LivenessConnector;

#[derive(Debug)]
pub enum LivenessClient {
    Pipe(SharedPipe),
    Http { http: reqwest::Client, target: HttpTarget },
}

impl LivenessClient {
    /// One round of "is the worker there". Returns a short description of what answered.
    pub async fn check(&self) -> Result<String, ConnectError> {
        match self {
            LivenessClient::Pipe(pipe) => {
                let mut pipe = pipe.lock().await;
                if !pipe.is_open() {
                    return Err(ConnectError::Client("pipe input already closed".to_string()));
                }
                // A live worker stays quiet until spoken to; a dead one reads as end of file.
                let mut byte = [0u8; 1];
                match tokio::time::timeout(PIPE_EOF_WINDOW, pipe.read(&mut byte)).await {
                    Err(_) | Ok(Ok(1..)) => Ok("pipe open".to_string()),
                    Ok(Ok(_)) => Err(ConnectError::Client("worker closed its output".to_string())),
                    Ok(Err(e)) => Err(ConnectError::Client(format!("reading worker output: {e}"))),
                }
            }
            LivenessClient::Http { http, target } => {
                let response = http
                    .get(format!("{}/", target.base_url))
                    .send()
                    .await
                    .map_err(|e| ConnectError::Client(e.to_string()))?;
                Ok(format!("HTTP {}", response.status()))
            }
        }
    }
}

impl ServiceConnector for LivenessConnector {
    type Client = LivenessClient;

    async fn connect(&self, binding: Binding, _logs: LogSubscription) -> Result<LivenessClient, ConnectError> {
        match binding {
            Binding::Pipe(pipe) => Ok(LivenessClient::Pipe(pipe)),
            Binding::Http(target) => {
                let http = reqwest::Client::builder()
                    .no_proxy()
                    .build()
                    .map_err(|e| ConnectError::Client(e.to_string()))?;
                Ok(LivenessClient::Http { http, target })
            }
        }
    }
}
