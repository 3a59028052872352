//! Configuration for the evaluator and bridge.

use serde::{Deserialize, Serialize};

use crate::error::GuardError;
use crate::policy::PolicyKind;
use crate::probe::EvidenceRule;

/// Environment variable selecting the policy.
pub const ENV_POLICY: &str = "DEVGUARD_POLICY";
/// Environment variable enabling evidence in verdict responses.
pub const ENV_INCLUDE_EVIDENCE: &str = "DEVGUARD_INCLUDE_EVIDENCE";
/// Environment variable selecting the mock-location evidence rule.
pub const ENV_MOCK_LOCATION_RULE: &str = "DEVGUARD_MOCK_LOCATION_RULE";

/// Configuration for devguard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Policy used for every evaluation.
    pub policy: PolicyKind,
    /// Attach the evidence trail to verdict responses.
    pub include_evidence: bool,
    /// Evidence rule for the mock-location probe of the developer-mode
    /// registry. The dedicated mock-location check always reads the value.
    pub mock_location_rule: EvidenceRule,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::DecisiveShortCircuit,
            include_evidence: false,
            mock_location_rule: EvidenceRule::Enabled,
        }
    }
}

impl GuardConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, GuardError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(|e| GuardError::ConfigError {
            message: format!("invalid config JSON: {e}"),
        })
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, GuardError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, GuardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_POLICY) {
            self.policy = PolicyKind::from_name(value.trim()).ok_or_else(|| {
                GuardError::ConfigError {
                    message: format!("{ENV_POLICY}: unknown policy '{value}'"),
                }
            })?;
        }

        if let Some(value) = lookup(ENV_INCLUDE_EVIDENCE) {
            self.include_evidence = parse_flag(&value).ok_or_else(|| GuardError::ConfigError {
                message: format!("{ENV_INCLUDE_EVIDENCE}: expected a boolean, got '{value}'"),
            })?;
        }

        if let Some(value) = lookup(ENV_MOCK_LOCATION_RULE) {
            self.mock_location_rule = EvidenceRule::from_name(value.trim()).ok_or_else(|| {
                GuardError::ConfigError {
                    message: format!("{ENV_MOCK_LOCATION_RULE}: unknown rule '{value}'"),
                }
            })?;
        }

        Ok(self)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
