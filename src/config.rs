//! Harness configuration.
//!
//! Everything has a default that matches a checkout of the TypeScript worker with `bun`, `node`
//! and `deno` on `PATH`. `from_env` layers `VGI_*` environment variables on top; a malformed value
//! is an error rather than being silently ignored.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vgi_matrix::{CombinationInfo, RuntimeTarget, runtimes};

use crate::errors::{HarnessError, HarnessResult};

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PREBUNDLED_READY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(250);
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 3;

/// Directory (under the worker dir) that holds built bundles.
pub const BUNDLE_DIR_NAME: &str = ".conformance-bundles";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Root of the TypeScript worker sources; combination entry points are relative to it.
    pub worker_dir: PathBuf,
    pub bundle_dir: PathBuf,
    /// Program invoked as `<bundler> build ...`.
    pub bundler: String,
    pub bun: String,
    pub node: String,
    pub deno: String,
    pub ready_timeout: Duration,
    /// Used instead of `ready_timeout` for bundled runtimes when `fast_probe_for_bundles` is set.
    pub prebundled_ready_timeout: Duration,
    pub fast_probe_for_bundles: bool,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    /// How long a pipe worker must stay up after spawn to count as started.
    pub startup_grace: Duration,
    /// Compression strength for the zstd HTTP variants.
    pub compression_level: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let worker_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::for_worker_dir(worker_dir)
    }
}

impl HarnessConfig {
    /// Defaults rooted at `worker_dir`.
    pub fn for_worker_dir(worker_dir: impl Into<PathBuf>) -> Self {
        let worker_dir = worker_dir.into();
        Self {
            bundle_dir: worker_dir.join(BUNDLE_DIR_NAME),
            worker_dir,
            bundler: "bun".to_string(),
            bun: runtimes::info_for(RuntimeTarget::Bun).executable.to_string(),
            node: runtimes::info_for(RuntimeTarget::Node).executable.to_string(),
            deno: runtimes::info_for(RuntimeTarget::Deno).executable.to_string(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            prebundled_ready_timeout: DEFAULT_PREBUNDLED_READY_TIMEOUT,
            fast_probe_for_bundles: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            startup_grace: DEFAULT_STARTUP_GRACE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> HarnessResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup` (keyed by environment variable name).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> HarnessResult<Self> {
        let mut config = match lookup("VGI_WORKER_DIR") {
            Some(dir) => Self::for_worker_dir(dir),
            None => Self::default(),
        };
        if let Some(dir) = lookup("VGI_BUNDLE_DIR") {
            config.bundle_dir = PathBuf::from(dir);
        }
        if let Some(bundler) = lookup("VGI_BUNDLER") {
            config.bundler = bundler;
        }
        if let Some(bun) = lookup("VGI_BUN") {
            config.bun = bun;
        }
        if let Some(node) = lookup("VGI_NODE") {
            config.node = node;
        }
        if let Some(deno) = lookup("VGI_DENO") {
            config.deno = deno;
        }
        if let Some(raw) = lookup("VGI_READY_TIMEOUT_SECS") {
            config.ready_timeout = parse_secs("VGI_READY_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("VGI_FAST_PROBE") {
            config.fast_probe_for_bundles = parse_flag("VGI_FAST_PROBE", &raw)?;
        }
        if let Some(raw) = lookup("VGI_STOP_TIMEOUT_SECS") {
            config.stop_timeout = parse_secs("VGI_STOP_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("VGI_HARNESS_COMPRESSION") {
            config.compression_level = raw.trim().parse().map_err(|_| HarnessError::Config {
                key: "VGI_HARNESS_COMPRESSION",
                value: raw.clone(),
                reason: "expected a non-negative integer".to_string(),
            })?;
        }
        Ok(config)
    }

    pub fn with_bundle_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = dir.into();
        self
    }

    pub fn with_bundler(mut self, bundler: impl Into<String>) -> Self {
        self.bundler = bundler.into();
        self
    }

    /// Point one runtime at a specific executable.
    pub fn with_executable(mut self, runtime: RuntimeTarget, program: impl Into<String>) -> Self {
        let program = program.into();
        match runtime {
            RuntimeTarget::Bun => self.bun = program,
            RuntimeTarget::Node => self.node = program,
            RuntimeTarget::Deno => self.deno = program,
        }
        self
    }

    /// Point every runtime and the bundler at the same program.
    pub fn with_all_executables(self, program: impl AsRef<str>) -> Self {
        let program = program.as_ref();
        RuntimeTarget::ALL
            .into_iter()
            .fold(self, |config, runtime| config.with_executable(runtime, program))
            .with_bundler(program)
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_fast_probe(mut self, enabled: bool) -> Self {
        self.fast_probe_for_bundles = enabled;
        self
    }

    pub fn executable(&self, runtime: RuntimeTarget) -> &str {
        match runtime {
            RuntimeTarget::Bun => &self.bun,
            RuntimeTarget::Node => &self.node,
            RuntimeTarget::Deno => &self.deno,
        }
    }

    pub fn entry_path(&self, info: &CombinationInfo) -> PathBuf {
        self.worker_dir.join(info.entry)
    }

    /// Output file for a combination's bundle; `None` for natively executed runtimes.
    pub fn bundle_path(&self, info: &CombinationInfo) -> Option<PathBuf> {
        info.bundle.map(|name| self.bundle_dir.join(name))
    }

    /// Readiness ceiling for workers of `runtime`.
    pub fn ready_timeout_for(&self, runtime: RuntimeTarget) -> Duration {
        if self.fast_probe_for_bundles && runtime.needs_bundle() {
            self.prebundled_ready_timeout
        } else {
            self.ready_timeout
        }
    }

    pub fn worker_dir(&self) -> &Path {
        &self.worker_dir
    }
}

fn parse_secs(key: &'static str, raw: &str) -> HarnessResult<Duration> {
    let secs: f64 = raw.trim().parse().map_err(|_| HarnessError::Config {
        key,
        value: raw.to_string(),
        reason: "expected a number of seconds".to_string(),
    })?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(HarnessError::Config {
            key,
            value: raw.to_string(),
            reason: "must be a positive number of seconds".to_string(),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_flag(key: &'static str, raw: &str) -> HarnessResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(HarnessError::Config {
            key,
            value: raw.to_string(),
            reason: "expected a boolean (1/0, true/false)".to_string(),
        }),
    }
}
