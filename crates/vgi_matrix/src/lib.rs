//! Provide the canonical vocabulary of the vgi-rpc conformance matrix.
//!
//! Every runtime target, transport mode, combination, scenario and override rule the harness knows
//! about is declared here as a `const` registry table, so the combination matrix stays closed and
//! statically checkable.
//!
//! ## Notes
//!
//! - This is a vocabulary crate: **no IO**, no global state, no process or network types.
//! - The orchestration (launching, probing, bundling, connecting) lives in the `vgi_conformance`
//!   crate and only consumes these tables.
//!
//! ## Examples
//! ```rust
//! use vgi_matrix::{Combination, RuntimeTarget, TransportMode};
//!
//! let combo = Combination::new(RuntimeTarget::Node, TransportMode::HttpZstd);
//! assert_eq!(combo.id(), "node-http-zstd");
//! assert_eq!(Combination::from_id("node-http-zstd"), Some(combo));
//! ```

pub mod combinations;
pub mod overrides;
pub mod runtimes;
pub mod scenarios;
pub mod transports;

pub use combinations::{COMBINATIONS, Combination, CombinationInfo};
pub use overrides::{Applicability, Expectation, OVERRIDES, OverrideRegistry, OverrideRule, RegistryError};
pub use runtimes::{RUNTIMES, RuntimeInfo, RuntimeTarget, WorkerSource};
pub use scenarios::{SCENARIOS, ScenarioFamily, ScenarioId, ScenarioInfo, Surfacing, SurfacingPoint};
pub use transports::{ProcessScope, ReadinessHandshake, TRANSPORTS, TransportClass, TransportInfo, TransportMode};

/// Environment variable a worker reads to configure outbound response compression.
pub const COMPRESSION_LEVEL_ENV: &str = "VGI_COMPRESSION_LEVEL";

/// Literal prefix of the readiness line an HTTP worker prints on its side channel.
pub const READINESS_PREFIX: &str = "PORT:";
