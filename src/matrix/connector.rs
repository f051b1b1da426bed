//! The seam between the harness and the RPC client library.
//!
//! The harness knows how to reach a worker; it does not know the protocol. A
//! [`ServiceConnector`] turns a transport [`Binding`] into whatever client object the scenario
//! battery talks to, and is handed a [`LogSubscription`] to forward server log messages through.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{ChildStdin, ChildStdout};

/// Full-duplex byte channel over a worker's stdin/stdout.
///
/// Writes go straight to the worker's stdin and reads come straight from its stdout; nothing is
/// buffered ahead or reordered.
#[derive(Debug)]
pub struct PipeChannel {
    input: Option<ChildStdin>,
    output: ChildStdout,
}

/// A pipe channel shared between the session and the clients using it.
pub type SharedPipe = Arc<tokio::sync::Mutex<PipeChannel>>;

impl PipeChannel {
    pub fn new(input: ChildStdin, output: ChildStdout) -> Self {
        Self {
            input: Some(input),
            output,
        }
    }

    pub fn into_shared(self) -> SharedPipe {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Close the worker's stdin. Pipe workers exit on end of input.
    pub async fn close_input(&mut self) {
        if let Some(mut input) = self.input.take() {
            let _ = input.shutdown().await;
        }
    }

    pub fn is_open(&self) -> bool {
        self.input.is_some()
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "worker input is closed")
}

impl AsyncRead for PipeChannel {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.output).poll_read(cx, buf)
    }
}

impl AsyncWrite for PipeChannel {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.input.as_mut() {
            Some(input) => Pin::new(input).poll_write(cx, buf),
            None => Poll::Ready(Err(closed())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.input.as_mut() {
            Some(input) => Pin::new(input).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.input.as_mut() {
            Some(input) => Pin::new(input).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// HTTP server a client should talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    pub base_url: String,
    /// Compression strength to request; `0` disables compression.
    pub compression_level: u32,
}

/// How a client reaches its worker.
#[derive(Debug, Clone)]
pub enum Binding {
    Pipe(SharedPipe),
    Http(HttpTarget),
}

impl Binding {
    pub fn kind(&self) -> &'static str {
        match self {
            Binding::Pipe(_) => "pipe",
            Binding::Http(_) => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        })
    }
}

/// A log message emitted by the service during a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

/// Callback that receives server log messages.
pub type LogSink = Arc<dyn Fn(LogRecord) + Send + Sync>;

/// One handle's view of the log callback. Delivery stops once the handle is released.
#[derive(Clone, Default)]
pub struct LogSubscription {
    sink: Option<LogSink>,
    active: Arc<AtomicBool>,
}

impl fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSubscription")
            .field("has_sink", &self.sink.is_some())
            .field("active", &self.is_active())
            .finish()
    }
}

impl LogSubscription {
    pub fn new(sink: Option<LogSink>) -> Self {
        Self {
            sink,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Forward `record` to the sink; returns whether it was delivered.
    pub fn emit(&self, record: LogRecord) -> bool {
        match &self.sink {
            Some(sink) if self.is_active() => {
                sink(record);
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Why a client could not be opened or closed.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("{binding} binding not supported by this connector")]
    UnsupportedBinding { binding: &'static str },
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Client(String),
}

/// Builds service clients over a binding.
pub trait ServiceConnector: Send + Sync + 'static {
    type Client: Send;

    fn connect(
        &self,
        binding: Binding,
        logs: LogSubscription,
    ) -> impl Future<Output = Result<Self::Client, ConnectError>> + Send;

    /// Close a client. The default just drops it.
    fn disconnect(&self, client: Self::Client) -> impl Future<Output = Result<(), ConnectError>> + Send {
        drop(client);
        async { Ok(()) }
    }
}
