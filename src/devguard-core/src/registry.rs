//! Probe registry: the ordered, immutable set of probes a policy runs.

use std::sync::Arc;

use tracing::debug;

use crate::probe::{EvidenceRule, Probe, SettingProbe};
use crate::settings::{
    SettingsNamespace, SettingsSource, KEY_ADB_ENABLED, KEY_ALLOW_MOCK_LOCATION,
    KEY_DEVELOPMENT_SETTINGS_ENABLED, KEY_STAY_ON_WHILE_PLUGGED_IN,
};
use crate::types::Signal;

/// A registered probe and its scheduling metadata.
#[derive(Clone)]
pub struct ProbeSpec {
    /// Signal reported by the probe.
    pub signal: Signal,
    /// Scheduling rank; lower runs earlier.
    pub priority: i32,
    /// A Positive from this probe alone ends evaluation with `true`.
    pub decisive: bool,
    /// The probe itself.
    pub probe: Arc<dyn Probe>,
}

impl ProbeSpec {
    /// Spec for `probe`; the signal is taken from the probe.
    pub fn new(probe: Arc<dyn Probe>, priority: i32, decisive: bool) -> Self {
        Self {
            signal: probe.signal(),
            priority,
            decisive,
            probe,
        }
    }

    /// Evidence rule of the underlying probe, if any.
    pub fn rule(&self) -> Option<EvidenceRule> {
        self.probe.rule()
    }
}

impl std::fmt::Debug for ProbeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSpec")
            .field("signal", &self.signal)
            .field("priority", &self.priority)
            .field("decisive", &self.decisive)
            .field("rule", &self.rule())
            .finish()
    }
}

/// Collects probes before the registry is frozen.
#[derive(Debug, Default)]
pub struct ProbeRegistryBuilder {
    specs: Vec<ProbeSpec>,
}

impl ProbeRegistryBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a probe.
    #[must_use]
    pub fn register(mut self, spec: ProbeSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Freeze into a registry ordered by priority, then registration order.
    pub fn build(self) -> ProbeRegistry {
        let mut specs = self.specs;
        // Stable sort keeps registration order among equal priorities.
        specs.sort_by_key(|s| s.priority);
        debug!(
            probes = ?specs.iter().map(|s| s.signal.as_str()).collect::<Vec<_>>(),
            "probe registry built"
        );
        ProbeRegistry { specs }
    }
}

/// Immutable, priority-ordered probe list.
///
/// Safe for any number of concurrent evaluations.
#[derive(Debug, Clone, Default)]
pub struct ProbeRegistry {
    specs: Vec<ProbeSpec>,
}

impl ProbeRegistry {
    /// Start building a registry.
    pub fn builder() -> ProbeRegistryBuilder {
        ProbeRegistryBuilder::new()
    }

    /// Probes in the order policies must run them.
    pub fn probes_in_priority_order(&self) -> &[ProbeSpec] {
        &self.specs
    }

    /// New registry holding only the probes for `signal`.
    pub fn restricted_to(&self, signal: Signal) -> ProbeRegistry {
        ProbeRegistry {
            specs: self
                .specs
                .iter()
                .filter(|s| s.signal == signal)
                .cloned()
                .collect(),
        }
    }

    /// Number of probes.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the registry has no probes.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Registry behind the `developer-mode` check.
///
/// | signal | setting | priority | decisive | rule |
/// |---|---|---|---|---|
/// | debug-bridge-enabled | global/adb_enabled | 0 | yes | enabled |
/// | development-settings-enabled | global/development_settings_enabled | 10 | yes | enabled |
/// | mock-location-allowed | secure/mock_location | 20 | no | `mock_location_rule` |
/// | stay-awake-enabled | global/stay_on_while_plugged_in | 30 | no | any-bit-set |
pub fn developer_mode_registry(
    source: Arc<dyn SettingsSource>,
    mock_location_rule: EvidenceRule,
) -> ProbeRegistry {
    ProbeRegistry::builder()
        .register(ProbeSpec::new(
            setting(
                &source,
                Signal::DebugBridgeEnabled,
                SettingsNamespace::Global,
                KEY_ADB_ENABLED,
                EvidenceRule::Enabled,
            ),
            0,
            true,
        ))
        .register(ProbeSpec::new(
            setting(
                &source,
                Signal::DevelopmentSettingsEnabled,
                SettingsNamespace::Global,
                KEY_DEVELOPMENT_SETTINGS_ENABLED,
                EvidenceRule::Enabled,
            ),
            10,
            true,
        ))
        .register(ProbeSpec::new(
            setting(
                &source,
                Signal::MockLocationAllowed,
                SettingsNamespace::Secure,
                KEY_ALLOW_MOCK_LOCATION,
                mock_location_rule,
            ),
            20,
            false,
        ))
        .register(ProbeSpec::new(
            setting(
                &source,
                Signal::StayAwakeEnabled,
                SettingsNamespace::Global,
                KEY_STAY_ON_WHILE_PLUGGED_IN,
                EvidenceRule::AnyBitSet,
            ),
            30,
            false,
        ))
        .build()
}

fn setting(
    source: &Arc<dyn SettingsSource>,
    signal: Signal,
    namespace: SettingsNamespace,
    key: &'static str,
    rule: EvidenceRule,
) -> Arc<dyn Probe> {
    Arc::new(SettingProbe::new(
        signal,
        namespace,
        key,
        rule,
        Arc::clone(source),
    ))
}

/// Registry behind the `mock-location` check: the mock-location probe
/// alone, always reading the value.
pub fn mock_location_registry(source: Arc<dyn SettingsSource>) -> ProbeRegistry {
    developer_mode_registry(source, EvidenceRule::Enabled)
        .restricted_to(Signal::MockLocationAllowed)
}
