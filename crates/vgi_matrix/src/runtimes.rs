//! Define the runtime engines that can host a conformance worker.
//!
//! ## Notes
//! - Bun executes the TypeScript worker source directly.
//! - Node and Deno only load a pre-built ESM bundle, which the harness produces with the bundler
//!   before launching them.

/// Stable identifier for every supported runtime engine.
///
/// ## Examples
/// ```rust
/// use vgi_matrix::runtimes::{self, RuntimeTarget};
///
/// assert_eq!(runtimes::from_str("deno"), Some(RuntimeTarget::Deno));
/// assert!(RuntimeTarget::Deno.needs_bundle());
/// assert!(!RuntimeTarget::Bun.needs_bundle());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuntimeTarget {
    Bun,
    Node,
    Deno,
}

/// How a runtime consumes the worker program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSource {
    /// The runtime executes the TypeScript entry point as-is.
    Native,
    /// The runtime needs a single self-contained bundle built for `target` in `format`.
    Bundled {
        target: &'static str,
        format: &'static str,
    },
}

/// Metadata for a runtime engine.
///
/// ## Notes
/// - `executable` is the default program name looked up on `PATH`; the harness configuration can
///   point it somewhere else.
/// - `launch_args` are inserted between the executable and the worker file.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeInfo {
    pub id: RuntimeTarget,
    pub canonical: &'static str,
    pub executable: &'static str,
    pub launch_args: &'static [&'static str],
    pub source: WorkerSource,
}

/// Registry of all runtime engines.
pub const RUNTIMES: &[RuntimeInfo] = &[
    RuntimeInfo {
        id: RuntimeTarget::Bun,
        canonical: "bun",
        executable: "bun",
        launch_args: &["run"],
        source: WorkerSource::Native,
    },
    RuntimeInfo {
        id: RuntimeTarget::Node,
        canonical: "node",
        executable: "node",
        launch_args: &[],
        source: WorkerSource::Bundled {
            target: "node",
            format: "esm",
        },
    },
    RuntimeInfo {
        id: RuntimeTarget::Deno,
        canonical: "deno",
        executable: "deno",
        launch_args: &["run", "--allow-all"],
        // Deno loads the node-targeted ESM bundle; the bundler has no deno target.
        source: WorkerSource::Bundled {
            target: "node",
            format: "esm",
        },
    },
];

impl RuntimeTarget {
    /// All runtime targets in registry order.
    pub const ALL: [RuntimeTarget; 3] = [RuntimeTarget::Bun, RuntimeTarget::Node, RuntimeTarget::Deno];

    /// Canonical spelling (`"bun"`, `"node"`, `"deno"`).
    pub fn as_str(self) -> &'static str {
        info_for(self).canonical
    }

    /// Whether the worker must be bundled before this runtime can load it.
    pub fn needs_bundle(self) -> bool {
        matches!(info_for(self).source, WorkerSource::Bundled { .. })
    }
}

impl std::fmt::Display for RuntimeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full metadata.
///
/// ## Panics
/// - If the registry is missing an entry for `id` (this indicates a programming error).
pub fn info_for(id: RuntimeTarget) -> &'static RuntimeInfo {
    RUNTIMES.iter().find(|r| r.id == id).expect("runtime info missing")
}

/// Lookup by canonical spelling.
pub fn from_str(s: &str) -> Option<RuntimeTarget> {
    RUNTIMES.iter().find(|r| r.canonical == s).map(|r| r.id)
}
