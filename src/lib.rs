#![forbid(unsafe_code)]
//! Conformance harness for the vgi-rpc TypeScript worker.
//!
//! The same protocol battery has to pass whichever runtime hosts the worker (Bun, Node, Deno) and
//! whichever transport carries the bytes (per-test pipe, shared pipe, HTTP, zstd HTTP). This crate
//! stands the workers up and hands scenarios a uniform client factory per combination:
//!
//! - [`worker`]: spawn and stop worker processes, with bounded teardown
//! - [`readiness`]: the `PORT:<n>` handshake and liveness polling
//! - [`bundle`]: build self-contained bundles for runtimes that need them
//! - [`matrix`]: session-scoped fixtures, scoped client handles, the connector seam
//! - [`scenarios`]: check where an expected error surfaced against the override registry
//!
//! The vocabulary (runtimes, transports, combinations, scenarios, overrides) lives in the
//! dependency-free `vgi_matrix` crate and is re-exported here.
//!
//! ## Panic Policy
//!
//! - **Production code**: `Result` with `?`; the `cli` module enforces `#![deny(clippy::unwrap_used)]`.
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//! - **Registry lookups**: `vgi_matrix::*::info_for` panics only when a const table is missing an
//!   entry, which the guardrail tests rule out.

pub mod bundle;
pub mod cli;
pub mod config;
pub mod errors;
pub mod matrix;
pub mod readiness;
pub mod scenarios;
pub mod stats;
pub mod worker;

pub use vgi_matrix;

pub use bundle::{BundleArtifact, BundleBuilder};
pub use config::HarnessConfig;
pub use errors::{HarnessError, HarnessResult};
pub use matrix::{Binding, Collected, ConnectionMatrix, Factory, ScopedClient, ServiceConnector, Session};
pub use readiness::{Endpoint, ReadinessKind, await_ready};
pub use scenarios::{SurfacingTrace, verify_surfacing};
pub use stats::{SessionStats, StatsSnapshot};
pub use worker::{WorkerCommand, WorkerLauncher, WorkerProcess};
