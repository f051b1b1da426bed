//! Define how bytes move between the test process and a worker.
//!
//! ## Notes
//! - Transport *modes* are what a test parametrises over; transport *classes* are what override
//!   rules key on. `Pipe` and `Subprocess` share the process-pipe class, `Http` and `HttpZstd`
//!   share the network class.
//! - Process scope decides whether a worker lives for one test or for the whole session.

/// Stable identifier for every transport mode.
///
/// ## Examples
/// ```rust
/// use vgi_matrix::transports::{self, TransportClass, TransportMode};
///
/// assert_eq!(transports::from_str("http-zstd"), Some(TransportMode::HttpZstd));
/// assert_eq!(TransportMode::Subprocess.class(), TransportClass::ProcessPipe);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportMode {
    /// A fresh worker per test; stdin/stdout carry the protocol.
    Pipe,
    /// One long-lived worker per session; stdin/stdout carry the protocol.
    Subprocess,
    /// One HTTP server per session, uncompressed responses.
    Http,
    /// One HTTP server per session, compressed responses.
    HttpZstd,
}

/// Coarse grouping used by override rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportClass {
    ProcessPipe,
    Network,
}

/// Lifetime of the worker process behind a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessScope {
    PerTest,
    Session,
}

/// Startup signal the harness waits for before using a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadinessHandshake {
    /// The worker is usable as soon as it is spawned; its stdio is the channel.
    None,
    /// The worker prints `PORT:<n>` on stdout, then must answer HTTP on that port.
    PortLine,
}

/// Metadata for a transport mode.
#[derive(Debug, Clone, Copy)]
pub struct TransportInfo {
    pub id: TransportMode,
    pub canonical: &'static str,
    pub class: TransportClass,
    pub scope: ProcessScope,
    pub handshake: ReadinessHandshake,
    pub compressed: bool,
}

/// Registry of all transport modes.
pub const TRANSPORTS: &[TransportInfo] = &[
    TransportInfo {
        id: TransportMode::Pipe,
        canonical: "pipe",
        class: TransportClass::ProcessPipe,
        scope: ProcessScope::PerTest,
        handshake: ReadinessHandshake::None,
        compressed: false,
    },
    TransportInfo {
        id: TransportMode::Subprocess,
        canonical: "subprocess",
        class: TransportClass::ProcessPipe,
        scope: ProcessScope::Session,
        handshake: ReadinessHandshake::None,
        compressed: false,
    },
    TransportInfo {
        id: TransportMode::Http,
        canonical: "http",
        class: TransportClass::Network,
        scope: ProcessScope::Session,
        handshake: ReadinessHandshake::PortLine,
        compressed: false,
    },
    TransportInfo {
        id: TransportMode::HttpZstd,
        canonical: "http-zstd",
        class: TransportClass::Network,
        scope: ProcessScope::Session,
        handshake: ReadinessHandshake::PortLine,
        compressed: true,
    },
];

impl TransportMode {
    /// All transport modes in registry order.
    pub const ALL: [TransportMode; 4] = [
        TransportMode::Pipe,
        TransportMode::Subprocess,
        TransportMode::Http,
        TransportMode::HttpZstd,
    ];

    pub fn as_str(self) -> &'static str {
        info_for(self).canonical
    }

    pub fn class(self) -> TransportClass {
        info_for(self).class
    }

    pub fn scope(self) -> ProcessScope {
        info_for(self).scope
    }

    pub fn handshake(self) -> ReadinessHandshake {
        info_for(self).handshake
    }

    pub fn is_compressed(self) -> bool {
        info_for(self).compressed
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TransportClass {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportClass::ProcessPipe => "process-pipe",
            TransportClass::Network => "network",
        }
    }
}

impl std::fmt::Display for TransportClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full metadata.
///
/// ## Panics
/// - If the registry is missing an entry for `id` (this indicates a programming error).
pub fn info_for(id: TransportMode) -> &'static TransportInfo {
    TRANSPORTS.iter().find(|t| t.id == id).expect("transport info missing")
}

/// Lookup by canonical spelling.
pub fn from_str(s: &str) -> Option<TransportMode> {
    TRANSPORTS.iter().find(|t| t.canonical == s).map(|t| t.id)
}
