//! Bundle builds for runtimes that cannot load the TypeScript worker directly.
//!
//! `<bundler> build <entry> --outfile <out> --target <target> --format <format>` produces one
//! self-contained file. Builds are cached by output path for the lifetime of a
//! [`BundleBuilder`], so two combinations sharing a bundle (`node-http` and `node-http-zstd`)
//! trigger one build. Asking for a different entry or runtime at a cached output path is a
//! configuration error. Bundles left on disk by an earlier session are never trusted: the first
//! request in a session always rebuilds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};
use vgi_matrix::{RuntimeTarget, WorkerSource, runtimes};

use crate::errors::{HarnessError, HarnessResult};
use crate::stats::SessionStats;
use crate::worker::WorkerCommand;

/// Ceiling on a single bundler run.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(120);

/// A built, runtime-loadable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleArtifact {
    pub path: PathBuf,
    pub entry: PathBuf,
    pub runtime: RuntimeTarget,
}

/// Result of running the bundler.
#[derive(Debug)]
pub struct BuildResult {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl BuildResult {
    /// Captured bundler output, stdout then stderr, as printed.
    pub fn output(&self) -> String {
        match (self.stdout.trim_end().is_empty(), self.stderr.trim_end().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

#[derive(Debug)]
pub struct BundleBuilder {
    bundler: String,
    cache: Mutex<HashMap<PathBuf, BundleArtifact>>,
    stats: Arc<SessionStats>,
}

impl BundleBuilder {
    pub fn new(bundler: impl Into<String>, stats: Arc<SessionStats>) -> Self {
        Self {
            bundler: bundler.into(),
            cache: Mutex::new(HashMap::new()),
            stats,
        }
    }

    /// The bundler invocation for one output file.
    pub fn build_command(&self, entry: &Path, out: &Path, target: &str, format: &str) -> WorkerCommand {
        WorkerCommand::new(&self.bundler)
            .arg("build")
            .arg(entry.to_string_lossy())
            .args(["--outfile".to_string(), out.to_string_lossy().into_owned()])
            .args(["--target", target, "--format", format])
    }

    /// File `runtime` should execute: the entry itself for native runtimes, a bundle otherwise.
    pub async fn prepare(&self, entry: &Path, runtime: RuntimeTarget, out: Option<&Path>) -> HarnessResult<PathBuf> {
        match (runtimes::info_for(runtime).source, out) {
            (WorkerSource::Native, _) => Ok(entry.to_path_buf()),
            (WorkerSource::Bundled { .. }, Some(out)) => Ok(self.build(entry, runtime, out).await?.path),
            (WorkerSource::Bundled { .. }, None) => Err(HarnessError::Config {
                key: "bundle",
                value: entry.display().to_string(),
                reason: format!("{runtime} needs a bundle output path"),
            }),
        }
    }

    /// Build `entry` for `runtime` into `out`, at most once per builder.
    #[tracing::instrument(skip_all, fields(runtime = %runtime, out = %out.display()))]
    pub async fn build(&self, entry: &Path, runtime: RuntimeTarget, out: &Path) -> HarnessResult<BundleArtifact> {
        let WorkerSource::Bundled { target, format } = runtimes::info_for(runtime).source else {
            return Err(HarnessError::Config {
                key: "bundle",
                value: runtime.to_string(),
                reason: "runtime executes the worker source natively".to_string(),
            });
        };

        let mut cache = self.cache.lock().await;
        if let Some(artifact) = cache.get(out) {
            if artifact.entry != entry || artifact.runtime != runtime {
                return Err(HarnessError::Config {
                    key: "bundle",
                    value: out.display().to_string(),
                    reason: format!(
                        "already holds {} built for {}",
                        artifact.entry.display(),
                        artifact.runtime
                    ),
                });
            }
            debug!("bundle already built this session");
            return Ok(artifact.clone());
        }

        if let Some(dir) = out.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| HarnessError::io(format!("creating bundle directory {}", dir.display()), e))?;
        }

        let command = self.build_command(entry, out, target, format);
        let result = self.run(&command).await?;
        if !result.success {
            return Err(HarnessError::Build {
                command: command.to_string(),
                status: result.status.clone(),
                output: result.output(),
            });
        }
        if !out.is_file() {
            return Err(HarnessError::Build {
                command: command.to_string(),
                status: result.status.clone(),
                output: format!("bundler reported success but {} was not written", out.display()),
            });
        }

        info!("bundle built");
        let artifact = BundleArtifact {
            path: out.to_path_buf(),
            entry: entry.to_path_buf(),
            runtime,
        };
        cache.insert(out.to_path_buf(), artifact.clone());
        Ok(artifact)
    }

    async fn run(&self, command: &WorkerCommand) -> HarnessResult<BuildResult> {
        let mut cmd = command.to_tokio();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.stats.record_build();

        let output = match tokio::time::timeout(BUILD_TIMEOUT, cmd.output()).await {
            Ok(output) => output.map_err(|source| HarnessError::BuildLaunch {
                command: command.to_string(),
                source,
            })?,
            Err(_) => {
                return Ok(BuildResult {
                    success: false,
                    status: format!("timed out after {BUILD_TIMEOUT:?}"),
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
        };

        Ok(BuildResult {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Artifacts built so far.
    pub async fn artifacts(&self) -> Vec<BundleArtifact> {
        let cache = self.cache.lock().await;
        let mut artifacts: Vec<_> = cache.values().cloned().collect();
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        artifacts
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command_line() {
        let builder = BundleBuilder::new("bun", Arc::default());
        let cmd = builder.build_command(
            Path::new("/w/examples/conformance-http-deno.ts"),
            Path::new("/w/.conformance-bundles/conformance-http-deno.js"),
            "node",
            "esm",
        );
        insta::assert_snapshot!(
            cmd.to_string(),
            @"bun build /w/examples/conformance-http-deno.ts --outfile /w/.conformance-bundles/conformance-http-deno.js --target node --format esm"
        );
    }

    #[test]
    fn test_output_keeps_both_streams() {
        let result = BuildResult {
            success: false,
            status: "exit status: 1".to_string(),
            stdout: "bundling 3 modules\n".to_string(),
            stderr: "error: Could not resolve \"./missing\"\n".to_string(),
        };
        assert_eq!(result.output(), "bundling 3 modules\nerror: Could not resolve \"./missing\"\n");
    }

    #[tokio::test]
    async fn test_native_runtime_never_builds() {
        let stats = Arc::new(SessionStats::default());
        let builder = BundleBuilder::new("vgi-no-such-bundler", Arc::clone(&stats));
        let entry = Path::new("/w/examples/conformance.ts");
        let file = builder.prepare(entry, RuntimeTarget::Bun, None).await.unwrap();
        assert_eq!(file, entry);
        assert_eq!(stats.snapshot().builds, 0);
    }

    #[tokio::test]
    async fn test_missing_bundler_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let builder = BundleBuilder::new("vgi-no-such-bundler", Arc::default());
        let err = builder
            .build(Path::new("/w/entry.ts"), RuntimeTarget::Node, &dir.path().join("out.js"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::BuildLaunch { .. }), "{err:?}");
    }
}
