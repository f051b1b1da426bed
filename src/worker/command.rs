//! Worker command lines.
//!
//! A [`WorkerCommand`] is plain data until it is turned into a `tokio::process::Command`, so the
//! exact launch line can be logged and quoted in errors.

use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use vgi_matrix::{COMPRESSION_LEVEL_ENV, CombinationInfo, runtimes};

use crate::config::HarnessConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Variables added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Launch line for one combination, running `worker_file` (the entry point or its bundle).
    ///
    /// `bun run <file>`, `node <file>` or `deno run --allow-all <file>`. Combinations that learn
    /// their compression level from the environment get `VGI_COMPRESSION_LEVEL` set.
    pub fn for_combination(config: &HarnessConfig, info: &CombinationInfo, worker_file: &Path) -> Self {
        let runtime = info.combination.runtime;
        let mut command = WorkerCommand::new(config.executable(runtime))
            .args(runtimes::info_for(runtime).launch_args.iter().copied())
            .arg(worker_file.to_string_lossy())
            .current_dir(config.worker_dir());
        if info.compression_via_env {
            command = command.env(COMPRESSION_LEVEL_ENV, config.compression_level.to_string());
        }
        command
    }

    pub fn to_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={value} ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Resolve `program` the way a shell would: paths are checked directly, bare names against `PATH`.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path).find_map(|dir| {
        let full = dir.join(program);
        if is_executable(&full) {
            return Some(full);
        }
        #[cfg(windows)]
        {
            let exe = full.with_extension("exe");
            if is_executable(&exe) {
                return Some(exe);
            }
        }
        None
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// `true` when `program` names something launchable on this host.
pub fn is_available(program: impl AsRef<OsStr>) -> bool {
    program.as_ref().to_str().and_then(find_executable).is_some()
}
