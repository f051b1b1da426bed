//! Record where a transport legitimately deviates from the canonical pipe behaviour.
//!
//! A scenario body stays transport-agnostic; it asks the [`OverrideRegistry`] for the
//! [`Expectation`] that holds on the transport under test. An override can change *when* an
//! expected error surfaces, or *where* a scenario runs at all. It can never drop the expected
//! error message: every expectation with a message still requires that message exactly once.
//!
//! ## Notes
//! - Rules are keyed by `(ScenarioId, TransportClass)`; at most one rule per key.
//! - The process-pipe class is canonical, so rules only ever target other classes in practice,
//!   but the registry does not forbid a pipe rule.
//!
//! ## Examples
//! ```rust
//! use vgi_matrix::{OverrideRegistry, ScenarioId, Surfacing, SurfacingPoint, TransportMode};
//!
//! let registry = OverrideRegistry::default();
//! let http = registry.expectation(ScenarioId::ExchangeErrorOnInit, TransportMode::Http);
//! assert_eq!(http.surfacing, Some(Surfacing::Exactly(SurfacingPoint::Initiation)));
//!
//! let pipe = registry.expectation(ScenarioId::ExchangeErrorOnInit, TransportMode::Pipe);
//! assert_eq!(pipe.surfacing, Some(Surfacing::Exactly(SurfacingPoint::FirstExchange)));
//! assert_eq!(pipe.message, http.message);
//! ```

use crate::scenarios::{self, ScenarioId, Surfacing, SurfacingPoint};
use crate::transports::{TransportClass, TransportMode};

/// Which transports a scenario runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Applicability {
    PipeOnly,
    AllTransports,
}

impl Applicability {
    pub fn includes(self, class: TransportClass) -> bool {
        match self {
            Applicability::PipeOnly => class == TransportClass::ProcessPipe,
            Applicability::AllTransports => true,
        }
    }
}

/// One documented deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideRule {
    pub scenario: ScenarioId,
    pub class: TransportClass,
    pub surfacing: Option<Surfacing>,
    pub applicability: Option<Applicability>,
    pub reason: &'static str,
}

/// Overrides for the vgi-rpc TypeScript worker.
pub const OVERRIDES: &[OverrideRule] = &[
    OverrideRule {
        scenario: ScenarioId::LargeData,
        class: TransportClass::Network,
        surfacing: None,
        applicability: Some(Applicability::AllTransports),
        reason: "the worker handles large payloads over HTTP as well as over pipes",
    },
    OverrideRule {
        scenario: ScenarioId::ProduceErrorOnInit,
        class: TransportClass::Network,
        surfacing: None,
        applicability: Some(Applicability::AllTransports),
        reason: "the worker drains unread client input after a stream init error",
    },
    OverrideRule {
        scenario: ScenarioId::ExchangeErrorOnInit,
        class: TransportClass::Network,
        surfacing: Some(Surfacing::Exactly(SurfacingPoint::Initiation)),
        applicability: None,
        reason: "HTTP raises during session initiation; pipe negotiation only notices on the first exchange",
    },
];

/// The expectation a scenario must meet on one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub scenario: ScenarioId,
    pub transport: TransportMode,
    pub message: Option<&'static str>,
    pub surfacing: Option<Surfacing>,
    pub applicability: Applicability,
    pub overridden_by: Option<OverrideRule>,
}

impl Expectation {
    /// Whether the scenario runs on this expectation's transport at all.
    pub fn applies(&self) -> bool {
        self.applicability.includes(self.transport.class())
    }
}

/// Why a set of rules was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    Duplicate { scenario: ScenarioId, class: TransportClass },
    NoEffect { scenario: ScenarioId, class: TransportClass },
    SurfacingWithoutError { scenario: ScenarioId },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Duplicate { scenario, class } => {
                write!(f, "more than one override for {scenario} on {class} transports")
            }
            RegistryError::NoEffect { scenario, class } => {
                write!(f, "override for {scenario} on {class} transports changes nothing")
            }
            RegistryError::SurfacingWithoutError { scenario } => {
                write!(f, "{scenario} expects no error, so its surfacing point cannot be overridden")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Validated set of override rules.
#[derive(Debug, Clone)]
pub struct OverrideRegistry {
    rules: Vec<OverrideRule>,
}

impl Default for OverrideRegistry {
    fn default() -> Self {
        Self {
            rules: OVERRIDES.to_vec(),
        }
    }
}

impl OverrideRegistry {
    /// Build a registry from arbitrary rules, rejecting duplicates and rules that cannot apply.
    pub fn new(rules: impl IntoIterator<Item = OverrideRule>) -> Result<Self, RegistryError> {
        let mut accepted: Vec<OverrideRule> = Vec::new();
        for rule in rules {
            if accepted
                .iter()
                .any(|r| r.scenario == rule.scenario && r.class == rule.class)
            {
                return Err(RegistryError::Duplicate {
                    scenario: rule.scenario,
                    class: rule.class,
                });
            }
            if rule.surfacing.is_none() && rule.applicability.is_none() {
                return Err(RegistryError::NoEffect {
                    scenario: rule.scenario,
                    class: rule.class,
                });
            }
            if rule.surfacing.is_some() && scenarios::info_for(rule.scenario).message.is_none() {
                return Err(RegistryError::SurfacingWithoutError { scenario: rule.scenario });
            }
            accepted.push(rule);
        }
        Ok(Self { rules: accepted })
    }

    /// An empty registry: every transport gets the canonical expectation.
    pub fn canonical() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rules(&self) -> &[OverrideRule] {
        &self.rules
    }

    /// The rule for `(scenario, class)`, if any.
    pub fn lookup(&self, scenario: ScenarioId, class: TransportClass) -> Option<&OverrideRule> {
        self.rules.iter().find(|r| r.scenario == scenario && r.class == class)
    }

    /// Canonical expectation for `scenario`, with the matching override substituted in.
    pub fn expectation(&self, scenario: ScenarioId, transport: TransportMode) -> Expectation {
        let info = scenarios::info_for(scenario);
        let rule = self.lookup(scenario, transport.class()).copied();

        Expectation {
            scenario,
            transport,
            message: info.message,
            surfacing: rule.and_then(|r| r.surfacing).or(info.surfacing),
            applicability: rule.and_then(|r| r.applicability).unwrap_or(info.applicability),
            overridden_by: rule,
        }
    }

    /// Whether `scenario` runs on `transport` once overrides are applied.
    pub fn applies(&self, scenario: ScenarioId, transport: TransportMode) -> bool {
        self.expectation(scenario, transport).applies()
    }
}
