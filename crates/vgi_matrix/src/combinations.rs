//! Enumerate the (runtime × transport) combinations under test.
//!
//! Only eight of the twelve possible pairs are real: the pipe-style transports are exercised on
//! Bun alone, while every runtime serves both HTTP variants. [`COMBINATIONS`] is the closed list;
//! anything not in it is not a combination.
//!
//! ## Notes
//! - `id` is the parametrisation id a test report shows (`"pipe"`, `"node-http-zstd"`, ...).
//! - `entry` is relative to the worker source directory; `bundle` is the file name inside the
//!   bundle directory for runtimes that need one.
//! - `compression_via_env` marks combinations whose worker learns its compression level from
//!   [`crate::COMPRESSION_LEVEL_ENV`] instead of from a dedicated entry point.

use crate::runtimes::RuntimeTarget;
use crate::transports::TransportMode;

/// One (runtime, transport) pair.
///
/// Identity is the pair; it is the reuse key for session-scoped workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Combination {
    pub runtime: RuntimeTarget,
    pub transport: TransportMode,
}

/// Metadata for a combination.
#[derive(Debug, Clone, Copy)]
pub struct CombinationInfo {
    pub combination: Combination,
    pub id: &'static str,
    pub entry: &'static str,
    pub bundle: Option<&'static str>,
    pub compression_via_env: bool,
}

/// Registry of every supported combination, in parametrisation order.
pub const COMBINATIONS: &[CombinationInfo] = &[
    info(RuntimeTarget::Bun, TransportMode::Pipe, "pipe", "examples/conformance.ts", None, false),
    info(RuntimeTarget::Bun, TransportMode::Subprocess, "subprocess", "examples/conformance.ts", None, false),
    info(RuntimeTarget::Bun, TransportMode::Http, "http", "examples/conformance-http.ts", None, false),
    info(
        RuntimeTarget::Bun,
        TransportMode::HttpZstd,
        "http-zstd",
        "examples/conformance-http-zstd.ts",
        None,
        false,
    ),
    info(
        RuntimeTarget::Node,
        TransportMode::Http,
        "node-http",
        "examples/conformance-http-node.ts",
        Some("conformance-http-node.js"),
        false,
    ),
    info(
        RuntimeTarget::Node,
        TransportMode::HttpZstd,
        "node-http-zstd",
        "examples/conformance-http-node.ts",
        Some("conformance-http-node.js"),
        true,
    ),
    info(
        RuntimeTarget::Deno,
        TransportMode::Http,
        "deno-http",
        "examples/conformance-http-deno.ts",
        Some("conformance-http-deno.js"),
        false,
    ),
    info(
        RuntimeTarget::Deno,
        TransportMode::HttpZstd,
        "deno-http-zstd",
        "examples/conformance-http-deno.ts",
        Some("conformance-http-deno.js"),
        true,
    ),
];

impl Combination {
    pub const fn new(runtime: RuntimeTarget, transport: TransportMode) -> Self {
        Self { runtime, transport }
    }

    /// Iterate over every supported combination in registry order.
    pub fn all() -> impl Iterator<Item = Combination> {
        COMBINATIONS.iter().map(|c| c.combination)
    }

    /// Metadata for this pair, or `None` if the pair is not part of the matrix.
    pub fn info(self) -> Option<&'static CombinationInfo> {
        COMBINATIONS.iter().find(|c| c.combination == self)
    }

    /// Whether the pair is one of the supported combinations.
    pub fn is_supported(self) -> bool {
        self.info().is_some()
    }

    /// Parametrisation id, e.g. `"deno-http"`.
    ///
    /// Unsupported pairs yield `"unsupported"`; their `Display` form is `"<runtime>-<transport>"`.
    pub fn id(self) -> &'static str {
        self.info().map(|c| c.id).unwrap_or("unsupported")
    }

    /// Lookup by parametrisation id.
    pub fn from_id(id: &str) -> Option<Combination> {
        COMBINATIONS.iter().find(|c| c.id == id).map(|c| c.combination)
    }
}

impl std::fmt::Display for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.info() {
            Some(info) => f.write_str(info.id),
            None => write!(f, "{}-{}", self.runtime, self.transport),
        }
    }
}

// --- helpers -----------------------------------------------------------------

const fn info(
    runtime: RuntimeTarget,
    transport: TransportMode,
    id: &'static str,
    entry: &'static str,
    bundle: Option<&'static str>,
    compression_via_env: bool,
) -> CombinationInfo {
    CombinationInfo {
        combination: Combination::new(runtime, transport),
        id,
        entry,
        bundle,
        compression_via_env,
    }
}
