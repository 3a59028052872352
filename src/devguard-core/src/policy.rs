//! Evaluation policies: fold probe outcomes into one verdict.
//!
//! Two strategies are provided behind [`EvaluationPolicy`]:
//!
//! - [`DecisiveShortCircuit`]: priority order, stops at the first Positive
//!   from a decisive probe. Non-decisive Positives count toward the verdict
//!   but never stop evaluation. Order-dependent.
//! - [`FlatOr`]: runs every probe, verdict is the OR of Positives. A probe
//!   that panics forces the verdict to `false` and marks the result faulted.
//!   Order-independent.
//!
//! Neither policy keeps state between calls.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::probe::run_guarded;
use crate::registry::ProbeRegistry;
use crate::types::{EvaluationResult, ProbeOutcome};

/// Version identifier of [`DecisiveShortCircuit`].
pub const DECISIVE_SHORT_CIRCUIT_VERSION: &str = "decisive-short-circuit/1";
/// Version identifier of [`FlatOr`].
pub const FLAT_OR_VERSION: &str = "flat-or/1";

/// Combination algorithm over a probe registry.
pub trait EvaluationPolicy: Send + Sync {
    /// Identifier recorded in every result.
    fn version(&self) -> &'static str;

    /// Run the registry and reduce its outcomes to a verdict.
    fn evaluate(&self, registry: &ProbeRegistry) -> EvaluationResult;
}

/// Configurable policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// [`DecisiveShortCircuit`].
    DecisiveShortCircuit,
    /// [`FlatOr`].
    FlatOr,
}

impl PolicyKind {
    /// Stable identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecisiveShortCircuit => "decisive-short-circuit",
            Self::FlatOr => "flat-or",
        }
    }

    /// Parse a stable identifier.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "decisive-short-circuit" => Some(Self::DecisiveShortCircuit),
            "flat-or" => Some(Self::FlatOr),
            _ => None,
        }
    }

    /// The policy implementation.
    #[must_use]
    pub fn policy(&self) -> &'static dyn EvaluationPolicy {
        match self {
            Self::DecisiveShortCircuit => &DecisiveShortCircuit,
            Self::FlatOr => &FlatOr,
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority-ordered evaluation with decisive short-circuit.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisiveShortCircuit;

impl EvaluationPolicy for DecisiveShortCircuit {
    fn version(&self) -> &'static str {
        DECISIVE_SHORT_CIRCUIT_VERSION
    }

    fn evaluate(&self, registry: &ProbeRegistry) -> EvaluationResult {
        let mut evidence = Vec::with_capacity(registry.len());
        let mut verdict = false;

        for spec in registry.probes_in_priority_order() {
            // Panics are already folded into Inconclusive here.
            let (outcome, _) = run_guarded(spec.probe.as_ref());
            let positive = outcome.verdict.is_positive();
            evidence.push(outcome);

            if positive && spec.decisive {
                debug!(signal = %spec.signal, "decisive probe positive, stopping");
                verdict = true;
                break;
            }
            if positive {
                debug!(signal = %spec.signal, "non-decisive probe positive, continuing");
                verdict = true;
            }
        }

        finish(self.version(), verdict, evidence, None)
    }
}

/// Unconditional OR over every probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatOr;

impl EvaluationPolicy for FlatOr {
    fn version(&self) -> &'static str {
        FLAT_OR_VERSION
    }

    fn evaluate(&self, registry: &ProbeRegistry) -> EvaluationResult {
        let mut evidence = Vec::with_capacity(registry.len());
        let mut faults = Vec::new();

        for spec in registry.probes_in_priority_order() {
            let (outcome, fault) = run_guarded(spec.probe.as_ref());
            if let Some(message) = fault {
                faults.push(format!("{}: {}", spec.signal, message));
            }
            evidence.push(outcome);
        }

        if !faults.is_empty() {
            let fault = faults.join("; ");
            warn!(fault = %fault, "probe fault, forcing verdict to false");
            return finish(self.version(), false, evidence, Some(fault));
        }

        let verdict = evidence.iter().any(|o| o.verdict.is_positive());
        finish(self.version(), verdict, evidence, None)
    }
}

fn finish(
    policy_version: &'static str,
    verdict: bool,
    evidence: Vec<ProbeOutcome>,
    fault: Option<String>,
) -> EvaluationResult {
    let result = EvaluationResult {
        verdict,
        evidence,
        policy_version: policy_version.to_string(),
        evaluated_at: chrono::Utc::now().timestamp(),
        fault,
    };
    info!(
        policy = policy_version,
        verdict = result.verdict,
        probes_run = result.evidence.len(),
        positives = result.positive_count(),
        faulted = result.fault.is_some(),
        digest = %result.digest(),
        "evaluation complete"
    );
    result
}
