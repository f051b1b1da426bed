//! Define the protocol scenarios whose expectations depend on the transport.
//!
//! The shared battery contains many more scenarios; only the ones that need a transport-aware
//! expectation are named here. Everything else runs unchanged on every combination.
//!
//! ## Notes
//! - The canonical expectation is the one observed on the process-pipe transport.
//! - `message` is the fixed substring the service puts in the error it raises on purpose.

use crate::overrides::Applicability;

/// Stable identifier for every transport-sensitive scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScenarioId {
    /// A producer stream whose construction fails on the server.
    ProduceErrorOnInit,
    /// A bidirectional exchange stream whose construction fails on the server.
    ExchangeErrorOnInit,
    /// Bulk payloads well beyond a single transport frame.
    LargeData,
}

/// Shape of the stream a scenario drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioFamily {
    Producer,
    Exchange,
    Bulk,
}

/// Point in a stream's life at which an error can reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SurfacingPoint {
    /// The call that opens the stream (session initiation).
    Initiation,
    /// The first data exchange: the first pull of a producer, the first exchange of a session.
    FirstExchange,
}

/// When an expected error must surface.
///
/// ## Examples
/// ```rust
/// use vgi_matrix::{Surfacing, SurfacingPoint};
///
/// let lenient = Surfacing::NoLaterThan(SurfacingPoint::FirstExchange);
/// assert!(lenient.accepts(SurfacingPoint::Initiation));
/// assert!(lenient.accepts(SurfacingPoint::FirstExchange));
///
/// let strict = Surfacing::Exactly(SurfacingPoint::Initiation);
/// assert!(!strict.accepts(SurfacingPoint::FirstExchange));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surfacing {
    /// The error must surface at this point and nowhere else.
    Exactly(SurfacingPoint),
    /// The error may surface at this point or any earlier one.
    NoLaterThan(SurfacingPoint),
}

impl Surfacing {
    /// Whether an error observed at `point` satisfies this expectation.
    pub fn accepts(self, point: SurfacingPoint) -> bool {
        match self {
            Surfacing::Exactly(expected) => point == expected,
            Surfacing::NoLaterThan(latest) => point <= latest,
        }
    }
}

impl SurfacingPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            SurfacingPoint::Initiation => "initiation",
            SurfacingPoint::FirstExchange => "first-exchange",
        }
    }
}

impl std::fmt::Display for SurfacingPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for Surfacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Surfacing::Exactly(point) => write!(f, "at {point}"),
            Surfacing::NoLaterThan(point) => write!(f, "by {point}"),
        }
    }
}

/// Metadata for a scenario.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioInfo {
    pub id: ScenarioId,
    pub canonical: &'static str,
    pub family: ScenarioFamily,
    pub message: Option<&'static str>,
    pub surfacing: Option<Surfacing>,
    pub applicability: Applicability,
}

/// Registry of transport-sensitive scenarios with their canonical (pipe) expectations.
pub const SCENARIOS: &[ScenarioInfo] = &[
    ScenarioInfo {
        id: ScenarioId::ProduceErrorOnInit,
        canonical: "produce-error-on-init",
        family: ScenarioFamily::Producer,
        message: Some("intentional init error"),
        surfacing: Some(Surfacing::NoLaterThan(SurfacingPoint::FirstExchange)),
        applicability: Applicability::PipeOnly,
    },
    ScenarioInfo {
        id: ScenarioId::ExchangeErrorOnInit,
        canonical: "exchange-error-on-init",
        family: ScenarioFamily::Exchange,
        message: Some("intentional exchange init error"),
        surfacing: Some(Surfacing::Exactly(SurfacingPoint::FirstExchange)),
        applicability: Applicability::AllTransports,
    },
    ScenarioInfo {
        id: ScenarioId::LargeData,
        canonical: "large-data",
        family: ScenarioFamily::Bulk,
        message: None,
        surfacing: None,
        applicability: Applicability::PipeOnly,
    },
];

impl ScenarioId {
    pub const ALL: [ScenarioId; 3] = [
        ScenarioId::ProduceErrorOnInit,
        ScenarioId::ExchangeErrorOnInit,
        ScenarioId::LargeData,
    ];

    pub fn as_str(self) -> &'static str {
        info_for(self).canonical
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full metadata.
///
/// ## Panics
/// - If the registry is missing an entry for `id` (this indicates a programming error).
pub fn info_for(id: ScenarioId) -> &'static ScenarioInfo {
    SCENARIOS.iter().find(|s| s.id == id).expect("scenario info missing")
}

/// Lookup by canonical spelling.
pub fn from_str(s: &str) -> Option<ScenarioId> {
    SCENARIOS.iter().find(|i| i.canonical == s).map(|i| i.id)
}
