//! Transport-aware scenario assertions.
//!
//! A shared scenario body drives a stream and records, in a [`SurfacingTrace`], every error it saw
//! and the point at which it saw it. [`verify_surfacing`] then checks the trace against the
//! [`Expectation`] the override registry resolves for the transport under test:
//!
//! - the expected message must be observed exactly once;
//! - it must surface at a point the expectation accepts;
//! - no other error may surface.
//!
//! The body never branches on the transport; only the expectation does.

use std::fmt;
use std::future::Future;

use thiserror::Error;
use tracing::debug;
use vgi_matrix::{Expectation, OverrideRegistry, ScenarioId, Surfacing, SurfacingPoint, TransportMode};

/// An error seen by a scenario body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub point: SurfacingPoint,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct SurfacingTrace {
    observations: Vec<Observation>,
}

impl SurfacingTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, point: SurfacingPoint, message: impl Into<String>) {
        self.observations.push(Observation {
            point,
            message: message.into(),
        });
    }

    /// Record `result`'s error at `point`; pass its value through.
    ///
    /// ## Examples
    /// ```rust
    /// use vgi_conformance::scenarios::SurfacingTrace;
    /// use vgi_matrix::SurfacingPoint;
    ///
    /// let mut trace = SurfacingTrace::new();
    /// let opened: Result<u32, String> = Ok(7);
    /// assert_eq!(trace.step(SurfacingPoint::Initiation, opened), Some(7));
    /// let pulled: Result<u32, String> = Err("intentional init error".into());
    /// assert_eq!(trace.step(SurfacingPoint::FirstExchange, pulled), None);
    /// assert_eq!(trace.observations().len(), 1);
    /// ```
    pub fn step<T, E: fmt::Display>(&mut self, point: SurfacingPoint, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.record(point, err.to_string());
                None
            }
        }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }
}

/// A scenario that passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified {
    pub scenario: ScenarioId,
    pub transport: TransportMode,
    /// Where the expected error surfaced; `None` for scenarios that expect no error.
    pub point: Option<SurfacingPoint>,
    pub overridden: bool,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("{scenario} does not run on {transport}")]
    NotApplicable {
        scenario: ScenarioId,
        transport: TransportMode,
    },
    #[error("{scenario} on {transport}: expected an error containing {message:?}, none surfaced")]
    Missing {
        scenario: ScenarioId,
        transport: TransportMode,
        message: &'static str,
    },
    #[error("{scenario} on {transport}: {message:?} surfaced {count} times, expected once")]
    Repeated {
        scenario: ScenarioId,
        transport: TransportMode,
        message: &'static str,
        count: usize,
    },
    #[error("{scenario} on {transport}: {message:?} surfaced at {observed}, expected {expected}")]
    WrongPoint {
        scenario: ScenarioId,
        transport: TransportMode,
        message: &'static str,
        observed: SurfacingPoint,
        expected: Surfacing,
    },
    #[error("{scenario} on {transport}: unexpected error at {point}: {message}")]
    Unexpected {
        scenario: ScenarioId,
        transport: TransportMode,
        point: SurfacingPoint,
        message: String,
    },
}

impl ScenarioError {
    /// Not-applicable scenarios are skips, not failures.
    pub fn is_skip(&self) -> bool {
        matches!(self, ScenarioError::NotApplicable { .. })
    }
}

/// Check a trace against an expectation.
pub fn verify_surfacing(expectation: &Expectation, trace: &SurfacingTrace) -> Result<Verified, ScenarioError> {
    let scenario = expectation.scenario;
    let transport = expectation.transport;
    if !expectation.applies() {
        return Err(ScenarioError::NotApplicable { scenario, transport });
    }

    let (matching, other): (Vec<&Observation>, Vec<&Observation>) = trace
        .observations()
        .iter()
        .partition(|o| expectation.message.is_some_and(|m| o.message.contains(m)));

    if let Some(stray) = other.first() {
        return Err(ScenarioError::Unexpected {
            scenario,
            transport,
            point: stray.point,
            message: stray.message.clone(),
        });
    }

    let point = match (expectation.message, matching.as_slice()) {
        (None, _) => None,
        (Some(message), []) => return Err(ScenarioError::Missing { scenario, transport, message }),
        (Some(message), [seen]) => match expectation.surfacing {
            Some(expected) if !expected.accepts(seen.point) => {
                return Err(ScenarioError::WrongPoint {
                    scenario,
                    transport,
                    message,
                    observed: seen.point,
                    expected,
                });
            }
            _ => Some(seen.point),
        },
        (Some(message), many) => {
            return Err(ScenarioError::Repeated {
                scenario,
                transport,
                message,
                count: many.len(),
            });
        }
    };

    Ok(Verified {
        scenario,
        transport,
        point,
        overridden: expectation.overridden_by.is_some(),
    })
}

/// Resolve the expectation for `(scenario, transport)`, run `body`, and verify what it recorded.
///
/// `body` is not run when the scenario does not apply to the transport.
pub async fn run_scenario<F, Fut>(
    registry: &OverrideRegistry,
    scenario: ScenarioId,
    transport: TransportMode,
    body: F,
) -> Result<Verified, ScenarioError>
where
    F: FnOnce(Expectation) -> Fut,
    Fut: Future<Output = SurfacingTrace>,
{
    let expectation = registry.expectation(scenario, transport);
    if !expectation.applies() {
        return Err(ScenarioError::NotApplicable { scenario, transport });
    }
    let trace = body(expectation).await;
    debug!(%scenario, %transport, observed = trace.observations().len(), "scenario finished");
    verify_surfacing(&expectation, &trace)
}
