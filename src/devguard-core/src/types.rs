//! Data model shared by probes, policies and the bridge.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a probe observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    /// USB debugging (adb) is switched on.
    DebugBridgeEnabled,
    /// The developer options menu is unlocked.
    DevelopmentSettingsEnabled,
    /// Mock location providers are allowed.
    MockLocationAllowed,
    /// The screen stays awake while charging.
    StayAwakeEnabled,
}

impl Signal {
    /// Every signal, in declaration order.
    pub const ALL: [Signal; 4] = [
        Signal::DebugBridgeEnabled,
        Signal::DevelopmentSettingsEnabled,
        Signal::MockLocationAllowed,
        Signal::StayAwakeEnabled,
    ];

    /// Stable identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DebugBridgeEnabled => "debug-bridge-enabled",
            Self::DevelopmentSettingsEnabled => "development-settings-enabled",
            Self::MockLocationAllowed => "mock-location-allowed",
            Self::StayAwakeEnabled => "stay-awake-enabled",
        }
    }

    /// Parse a stable identifier.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The condition holds.
    Positive,
    /// The condition does not hold.
    Negative,
    /// The probe could not tell.
    Inconclusive,
}

impl Verdict {
    /// Whether this is `Positive`.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive)
    }
}

/// One probe's contribution to an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Signal that was probed.
    pub signal: Signal,
    /// Probe verdict.
    pub verdict: Verdict,
    /// Optional diagnostic (failure reason, value read).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProbeOutcome {
    /// Outcome without detail.
    pub fn new(signal: Signal, verdict: Verdict) -> Self {
        Self {
            signal,
            verdict,
            detail: None,
        }
    }

    /// Outcome with detail.
    pub fn with_detail(signal: Signal, verdict: Verdict, detail: impl Into<String>) -> Self {
        Self {
            signal,
            verdict,
            detail: Some(detail.into()),
        }
    }
}

/// Result of running a policy over a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Final verdict: `true` means trust should be reduced.
    pub verdict: bool,
    /// Outcomes in the order the probes ran.
    pub evidence: Vec<ProbeOutcome>,
    /// Identifier of the policy that produced this result.
    pub policy_version: String,
    /// Unix timestamp (seconds) of the evaluation.
    pub evaluated_at: i64,
    /// Set when an unabsorbed probe fault forced the verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl EvaluationResult {
    /// Number of `Positive` outcomes in the evidence.
    #[must_use]
    pub fn positive_count(&self) -> usize {
        self.evidence
            .iter()
            .filter(|o| o.verdict.is_positive())
            .count()
    }

    /// Check the verdict against its evidence.
    ///
    /// `true` needs at least one Positive outcome, `false` needs none.
    /// Faulted results are exempt: their verdict is forced.
    #[must_use]
    pub fn is_justified(&self) -> bool {
        if self.fault.is_some() {
            return !self.verdict;
        }
        let positives = self.positive_count();
        if self.verdict {
            positives > 0
        } else {
            positives == 0
        }
    }

    /// SHA-256 over the policy version, verdict and evidence, hex encoded.
    ///
    /// Used to correlate a reported verdict with its log entry.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.policy_version.as_bytes());
        hasher.update([u8::from(self.verdict)]);
        for outcome in &self.evidence {
            hasher.update(outcome.signal.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(match outcome.verdict {
                Verdict::Positive => b"P",
                Verdict::Negative => b"N",
                Verdict::Inconclusive => b"I",
            });
            if let Some(detail) = &outcome.detail {
                hasher.update(detail.as_bytes());
            }
            hasher.update([0xFFu8]);
        }
        hex::encode(hasher.finalize())
    }
}
