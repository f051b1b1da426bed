//! Command-line interface for the conformance harness.
//!
//! ## Commands
//!
//! - `matrix [--json]` - List the combinations and whether each can run here
//! - `bundle [--runtime <r>]` - Build the bundles for Node/Deno
//! - `check [-k EXPR] [-x] [-v]` - Start every worker, probe it, stop it (pytest-style report)
//! - `overrides` - Show the resolved per-transport expectations
//!
//! ## Design
//!
//! Command functions return `CliResult<ExitCode>`; only [`run`] exits the process. Harness errors
//! are rendered through `miette` so their codes and help text reach the terminal.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;
pub mod reporter;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use crate::config::{BUNDLE_DIR_NAME, HarnessConfig};
use crate::errors::HarnessError;

// ============================================================================
// CLI Error handling
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
    /// Configuration or usage problem, before any worker was touched.
    pub const USAGE: ExitCode = ExitCode(2);
}

/// A user-facing message and the exit code to leave with.
#[derive(Debug)]
pub struct CliError {
    pub message: String,
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::USAGE)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<HarnessError> for CliError {
    fn from(err: HarnessError) -> Self {
        let exit_code = if matches!(err, HarnessError::Config { .. }) {
            ExitCode::USAGE
        } else {
            ExitCode::FAILURE
        };
        CliError::new(format!("{:?}", miette::Report::new(err)), exit_code)
    }
}

pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Conformance harness for the vgi-rpc TypeScript worker
#[derive(Parser, Debug)]
#[command(name = "vgi-conformance")]
#[command(version = VERSION)]
#[command(about = "Run the vgi-rpc TypeScript worker across runtimes and transports", long_about = None)]
pub struct Cli {
    /// Root of the TypeScript worker checkout (default: $VGI_WORKER_DIR or the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub worker_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every (runtime, transport) combination
    Matrix {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Build bundles for runtimes that cannot run TypeScript directly
    Bundle {
        /// Only build for this runtime (node, deno)
        #[arg(long, value_name = "RUNTIME")]
        runtime: Option<String>,
    },

    /// Launch, probe and stop the worker of every combination
    Check {
        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
        /// Stop on first failure
        #[arg(short = 'x', long = "exitfirst")]
        stop_on_fail: bool,
        /// Only check combinations whose id contains EXPR
        #[arg(short = 'k', value_name = "EXPR")]
        filter: Option<String>,
    },

    /// Show how each transport-sensitive scenario is expected to behave per transport
    Overrides,
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Parse arguments, run the command and exit.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

fn load_config(worker_dir: Option<PathBuf>) -> CliResult<HarnessConfig> {
    let mut config = HarnessConfig::from_env()?;
    if let Some(dir) = worker_dir {
        if std::env::var_os("VGI_BUNDLE_DIR").is_none() {
            config.bundle_dir = dir.join(BUNDLE_DIR_NAME);
        }
        config.worker_dir = dir;
    }
    Ok(config)
}

/// Execute a parsed command line.
pub fn execute(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Command::Matrix { json } => commands::list_matrix(&load_config(cli.worker_dir)?, json),
        Command::Bundle { runtime } => commands::build_bundles(load_config(cli.worker_dir)?, runtime.as_deref()),
        Command::Check {
            verbose,
            stop_on_fail,
            filter,
        } => commands::check_matrix(
            load_config(cli.worker_dir)?,
            &mut reporter::ConsoleReporter::new(verbose),
            stop_on_fail,
            filter.as_deref(),
        ),
        Command::Overrides => commands::show_overrides(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_matrix_json() {
        let cli = Cli::try_parse_from(["vgi-conformance", "matrix", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Matrix { json: true }));
    }

    #[test]
    fn test_cli_parse_check() {
        let cli = Cli::try_parse_from(["vgi-conformance", "check", "-v", "-x", "-k", "deno"]).unwrap();
        if let Command::Check {
            verbose,
            stop_on_fail,
            filter,
        } = cli.command
        {
            assert!(verbose);
            assert!(stop_on_fail);
            assert_eq!(filter.as_deref(), Some("deno"));
        } else {
            panic!("Expected Check command");
        }
    }

    #[test]
    fn test_cli_parse_global_worker_dir() {
        let cli = Cli::try_parse_from(["vgi-conformance", "bundle", "--runtime", "node", "--worker-dir", "/w"]).unwrap();
        assert_eq!(cli.worker_dir, Some(PathBuf::from("/w")));
        assert!(matches!(cli.command, Command::Bundle { runtime: Some(ref r) } if r == "node"));
    }

    #[test]
    fn test_config_error_exit_code() {
        let err: CliError = HarnessError::Config {
            key: "VGI_STOP_TIMEOUT_SECS",
            value: "soon".to_string(),
            reason: "expected a number of seconds".to_string(),
        }
        .into();
        assert_eq!(err.exit_code, ExitCode::USAGE);
        assert!(err.message.contains("VGI_STOP_TIMEOUT_SECS"));
    }
}
