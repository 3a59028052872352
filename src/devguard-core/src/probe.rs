//! Probes: single read-only queries of one platform condition.
//!
//! A probe's own failure is signal, not a program fault. [`run_probe`]
//! turns every error, and any panic inside the query, into an
//! `Inconclusive` outcome carrying the failure as detail.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProbeError;
use crate::settings::{SettingsNamespace, SettingsSource};
use crate::types::{ProbeOutcome, Signal, Verdict};

/// What a successful query observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Probe verdict.
    pub verdict: Verdict,
    /// What was read.
    pub detail: Option<String>,
}

impl Observation {
    /// Observation without detail.
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            detail: None,
        }
    }

    /// Observation with detail.
    pub fn with_detail(verdict: Verdict, detail: impl Into<String>) -> Self {
        Self {
            verdict,
            detail: Some(detail.into()),
        }
    }
}

/// A single signal source.
pub trait Probe: Send + Sync {
    /// Signal this probe reports on.
    fn signal(&self) -> Signal;

    /// Evidence rule applied to the reading, if the probe uses one.
    fn rule(&self) -> Option<EvidenceRule> {
        None
    }

    /// Query the platform. Must be read-only and complete in bounded time.
    fn query(&self) -> Result<Observation, ProbeError>;
}

/// What reading counts as `Positive` for a setting-backed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvidenceRule {
    /// `1` is Positive, `0` or unset is Negative, anything else is
    /// an unexpected value.
    Enabled,
    /// Any set bit is Positive, `0` or unset is Negative, negative values
    /// are unexpected.
    AnyBitSet,
    /// A present value is Positive whatever it is. Readability stands in for
    /// "the developer menu exists".
    ///
    /// An unset key is Negative. Hosts that read the key with a fallback
    /// default see every key as readable; this rule does not.
    Readable,
}

impl EvidenceRule {
    /// Stable identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::AnyBitSet => "any-bit-set",
            Self::Readable => "readable",
        }
    }

    /// Parse a stable identifier.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Enabled, Self::AnyBitSet, Self::Readable]
            .into_iter()
            .find(|r| r.as_str() == name)
    }

    /// Classify a successful read of `key`.
    pub fn classify(&self, key: &str, value: Option<i64>) -> Result<Verdict, ProbeError> {
        let unexpected = |value| ProbeError::UnexpectedValue {
            key: key.to_string(),
            value,
        };
        match (self, value) {
            (_, None) => Ok(Verdict::Negative),
            (Self::Readable, Some(_)) => Ok(Verdict::Positive),
            (Self::Enabled, Some(1)) => Ok(Verdict::Positive),
            (Self::Enabled, Some(0)) => Ok(Verdict::Negative),
            (Self::Enabled, Some(v)) => Err(unexpected(v)),
            (Self::AnyBitSet, Some(v)) if v > 0 => Ok(Verdict::Positive),
            (Self::AnyBitSet, Some(0)) => Ok(Verdict::Negative),
            (Self::AnyBitSet, Some(v)) => Err(unexpected(v)),
        }
    }
}

impl std::fmt::Display for EvidenceRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe backed by one integer platform setting.
pub struct SettingProbe {
    signal: Signal,
    namespace: SettingsNamespace,
    key: &'static str,
    rule: EvidenceRule,
    source: Arc<dyn SettingsSource>,
}

impl SettingProbe {
    /// Probe reading `namespace/key` from `source`.
    pub fn new(
        signal: Signal,
        namespace: SettingsNamespace,
        key: &'static str,
        rule: EvidenceRule,
        source: Arc<dyn SettingsSource>,
    ) -> Self {
        Self {
            signal,
            namespace,
            key,
            rule,
            source,
        }
    }

    /// Namespace read.
    pub fn namespace(&self) -> SettingsNamespace {
        self.namespace
    }

    /// Key read.
    pub fn key(&self) -> &'static str {
        self.key
    }
}

impl std::fmt::Debug for SettingProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingProbe")
            .field("signal", &self.signal)
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}

impl Probe for SettingProbe {
    fn signal(&self) -> Signal {
        self.signal
    }

    fn rule(&self) -> Option<EvidenceRule> {
        Some(self.rule)
    }

    fn query(&self) -> Result<Observation, ProbeError> {
        let value = self.source.read_int(self.namespace, self.key)?;
        let verdict = self.rule.classify(self.key, value)?;
        let shown = value.map_or_else(|| "unset".to_string(), |v| v.to_string());
        Ok(Observation::with_detail(
            verdict,
            format!("{}/{}={} ({})", self.namespace, self.key, shown, self.rule),
        ))
    }
}

/// Run a probe, absorbing every failure into `Inconclusive`.
pub fn run_probe(probe: &dyn Probe) -> ProbeOutcome {
    run_guarded(probe).0
}

/// Run a probe and also report whether it panicked.
///
/// The outcome is `Inconclusive` in both error and panic cases; the second
/// element carries the panic message so a policy can treat it as a fault.
pub(crate) fn run_guarded(probe: &dyn Probe) -> (ProbeOutcome, Option<String>) {
    let signal = probe.signal();
    match panic::catch_unwind(AssertUnwindSafe(|| probe.query())) {
        Ok(Ok(observation)) => {
            debug!(
                signal = %signal,
                verdict = ?observation.verdict,
                detail = ?observation.detail,
                "probe completed"
            );
            let outcome = ProbeOutcome {
                signal,
                verdict: observation.verdict,
                detail: observation.detail,
            };
            (outcome, None)
        },
        Ok(Err(e)) => {
            debug!(signal = %signal, error = %e, "probe inconclusive");
            (
                ProbeOutcome::with_detail(signal, Verdict::Inconclusive, e.to_string()),
                None,
            )
        },
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(signal = %signal, panic = %message, "probe panicked");
            (
                ProbeOutcome::with_detail(
                    signal,
                    Verdict::Inconclusive,
                    format!("probe panicked: {message}"),
                ),
                Some(message),
            )
        },
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
