//! Error taxonomy for the harness.
//!
//! Setup-time errors (launch, build, readiness) are raised at fixture scope and memoised, so
//! every test depending on a broken fixture reports the same failure. Protocol errors raised by
//! the service are not harness errors; scenarios assert them through
//! [`crate::scenarios::verify_surfacing`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;
use vgi_matrix::Combination;

use crate::matrix::ConnectError;

/// Result alias used throughout the harness.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Everything that can go wrong while standing up, using or tearing down a combination.
#[derive(Debug, Error, Diagnostic)]
pub enum HarnessError {
    #[error("invalid configuration value {value:?} for {key}: {reason}")]
    #[diagnostic(code(vgi::config))]
    Config {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to launch worker `{command}`: {source}")]
    #[diagnostic(code(vgi::launch), help("check that the runtime executable is installed and on PATH"))]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("worker `{command}` exited during startup ({status})\n{stderr}")]
    #[diagnostic(code(vgi::launch::exit))]
    EarlyExit {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("worker `{command}` printed {line:?} instead of `PORT:<n>`")]
    #[diagnostic(
        code(vgi::readiness::malformed),
        help("the first line a worker prints must be the readiness line; diagnostics belong on stderr")
    )]
    MalformedReadiness { command: String, line: String },

    #[error("worker `{command}` was not ready after {timeout:?} (waiting for {stage})")]
    #[diagnostic(code(vgi::readiness::timeout))]
    ReadinessTimeout {
        command: String,
        timeout: Duration,
        stage: &'static str,
    },

    #[error("liveness probe of {url} failed: {source}")]
    #[diagnostic(code(vgi::probe))]
    Probe {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to run bundler `{command}`: {source}")]
    #[diagnostic(code(vgi::build::launch))]
    BuildLaunch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("bundler `{command}` failed ({status})\n{output}")]
    #[diagnostic(code(vgi::build))]
    Build {
        command: String,
        status: String,
        output: String,
    },

    #[error("worker `{command}` (pid {pid}) did not exit within {timeout:?} of SIGTERM")]
    #[diagnostic(
        code(vgi::teardown),
        help("a worker that ignores termination would corrupt later runs; it has been killed")
    )]
    TeardownTimeout {
        command: String,
        pid: u32,
        timeout: Duration,
    },

    #[error("fixture {fixture} failed during setup")]
    #[diagnostic(code(vgi::setup))]
    Setup {
        fixture: String,
        #[source]
        cause: Arc<HarnessError>,
    },

    #[error("{combination}: could not open a client")]
    #[diagnostic(code(vgi::connect))]
    Connect {
        combination: Combination,
        #[source]
        source: ConnectError,
    },

    #[error("{combination} is not part of the conformance matrix")]
    #[diagnostic(code(vgi::unsupported))]
    Unsupported { combination: Combination },

    #[error("{context}: {source}")]
    #[diagnostic(code(vgi::io))]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl HarnessError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error happened while a fixture was being set up (launch, build, readiness).
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            HarnessError::Launch { .. }
                | HarnessError::EarlyExit { .. }
                | HarnessError::MalformedReadiness { .. }
                | HarnessError::ReadinessTimeout { .. }
                | HarnessError::Probe { .. }
                | HarnessError::BuildLaunch { .. }
                | HarnessError::Build { .. }
                | HarnessError::Setup { .. }
        )
    }

    /// Innermost error for memoised setup failures, `self` otherwise.
    pub fn root_cause(&self) -> &HarnessError {
        match self {
            HarnessError::Setup { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
