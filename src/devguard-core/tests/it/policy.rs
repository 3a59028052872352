//! Property-based tests for the evaluation policies.
//!
//! These tests verify verdict justification, short-circuit behavior and
//! fault containment over arbitrary probe registries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use devguard_core::{
    DecisiveShortCircuit, EvaluationPolicy, FlatOr, Observation, Probe, ProbeError, ProbeRegistry,
    ProbeSpec, Signal, Verdict,
};

/// What a scripted probe does when queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Returns(Verdict),
    Fails,
    Panics,
}

struct ScriptedProbe {
    signal: Signal,
    script: Script,
    calls: AtomicUsize,
}

impl Probe for ScriptedProbe {
    fn signal(&self) -> Signal {
        self.signal
    }

    fn query(&self) -> Result<Observation, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Returns(verdict) => Ok(Observation::new(verdict)),
            Script::Fails => Err(ProbeError::Unavailable {
                reason: "settings provider gone".into(),
            }),
            Script::Panics => panic!("probe blew up"),
        }
    }
}

/// One registry entry: script, priority, decisive.
type Entry = (Script, i32, bool);

fn script_strategy() -> impl Strategy<Value = Script> {
    prop_oneof![
        4 => Just(Script::Returns(Verdict::Positive)),
        4 => Just(Script::Returns(Verdict::Negative)),
        2 => Just(Script::Returns(Verdict::Inconclusive)),
        1 => Just(Script::Fails),
    ]
}

fn entries(script: impl Strategy<Value = Script>) -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::vec((script, -50i32..50, any::<bool>()), 0..8)
}

fn build(entries: &[Entry]) -> (ProbeRegistry, Vec<Arc<ScriptedProbe>>) {
    let probes: Vec<Arc<ScriptedProbe>> = entries
        .iter()
        .enumerate()
        .map(|(i, (script, _, _))| {
            Arc::new(ScriptedProbe {
                signal: Signal::ALL[i % Signal::ALL.len()],
                script: *script,
                calls: AtomicUsize::new(0),
            })
        })
        .collect();

    let registry = entries
        .iter()
        .zip(&probes)
        .fold(ProbeRegistry::builder(), |b, ((_, priority, decisive), probe)| {
            let probe: Arc<dyn Probe> = probe.clone();
            b.register(ProbeSpec::new(probe, *priority, *decisive))
        })
        .build();

    (registry, probes)
}

fn calls(probes: &[Arc<ScriptedProbe>]) -> usize {
    probes.iter().map(|p| p.calls.load(Ordering::SeqCst)).sum()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    // ========================================================================
    // Justification
    // ========================================================================

    /// A true verdict always has a Positive behind it, a false one never.
    #[test]
    fn verdict_is_justified_by_evidence(entries in entries(script_strategy())) {
        let (registry, _) = build(&entries);
        let a = DecisiveShortCircuit.evaluate(&registry);
        let b = FlatOr.evaluate(&registry);
        prop_assert!(a.is_justified());
        prop_assert!(b.is_justified());
        prop_assert_eq!(a.verdict, a.positive_count() > 0);
        prop_assert_eq!(b.verdict, b.positive_count() > 0);
    }

    /// Probes that never say Positive never produce a true verdict.
    #[test]
    fn no_positive_means_false(
        entries in entries(prop_oneof![
            Just(Script::Returns(Verdict::Negative)),
            Just(Script::Returns(Verdict::Inconclusive)),
            Just(Script::Fails),
        ])
    ) {
        let (registry, _) = build(&entries);
        prop_assert!(!DecisiveShortCircuit.evaluate(&registry).verdict);
        prop_assert!(!FlatOr.evaluate(&registry).verdict);
    }

    // ========================================================================
    // Ordering and short-circuit
    // ========================================================================

    /// Evidence follows ascending priority, ties in registration order.
    #[test]
    fn evidence_in_priority_order(entries in entries(script_strategy())) {
        let (registry, _) = build(&entries);
        let result = FlatOr.evaluate(&registry);

        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| entries[i].1);
        let expected: Vec<Signal> = order
            .into_iter()
            .map(|i| Signal::ALL[i % Signal::ALL.len()])
            .collect();
        let actual: Vec<Signal> = result.evidence.iter().map(|o| o.signal).collect();
        prop_assert_eq!(actual, expected);
    }

    /// Nothing runs after the first decisive Positive; everything runs
    /// when there is none.
    #[test]
    fn short_circuit_stops_at_first_decisive_positive(entries in entries(script_strategy())) {
        let (registry, probes) = build(&entries);
        let result = DecisiveShortCircuit.evaluate(&registry);

        let stop = registry
            .probes_in_priority_order()
            .iter()
            .zip(&result.evidence)
            .position(|(spec, outcome)| spec.decisive && outcome.verdict.is_positive());

        match stop {
            Some(index) => {
                prop_assert!(result.verdict);
                prop_assert_eq!(result.evidence.len(), index + 1);
            },
            None => prop_assert_eq!(result.evidence.len(), registry.len()),
        }
        prop_assert_eq!(calls(&probes), result.evidence.len());
    }

    /// Flat OR gives the same verdict whatever the priorities.
    #[test]
    fn flat_or_is_order_independent(
        entries in entries(script_strategy()),
        seed in any::<u64>()
    ) {
        let (registry, _) = build(&entries);
        let reprioritized: Vec<Entry> = entries
            .iter()
            .enumerate()
            .map(|(i, (script, _, decisive))| {
                let priority = (seed.rotate_left(i as u32 * 7) % 97) as i32;
                (*script, priority, *decisive)
            })
            .collect();
        let (shuffled, _) = build(&reprioritized);

        prop_assert_eq!(FlatOr.evaluate(&registry).verdict, FlatOr.evaluate(&shuffled).verdict);
    }

    // ========================================================================
    // Fault containment
    // ========================================================================

    /// A panicking probe never escapes evaluation.
    #[test]
    fn panics_are_contained(
        entries in entries(prop_oneof![
            3 => script_strategy(),
            1 => Just(Script::Panics),
        ])
    ) {
        let (registry, probes) = build(&entries);
        let any_panic = entries.iter().any(|(s, _, _)| *s == Script::Panics);

        let flat = FlatOr.evaluate(&registry);
        prop_assert_eq!(calls(&probes), entries.len());
        prop_assert_eq!(flat.fault.is_some(), any_panic);
        if any_panic {
            prop_assert!(!flat.verdict);
        }
        prop_assert!(flat.is_justified());

        let decisive = DecisiveShortCircuit.evaluate(&registry);
        prop_assert!(decisive.fault.is_none());
        prop_assert!(decisive.is_justified());
    }
}

#[test]
fn failing_probe_is_inconclusive_with_reason() {
    let (registry, _) = build(&[(Script::Fails, 0, true)]);
    let result = FlatOr.evaluate(&registry);
    assert_eq!(result.evidence[0].verdict, Verdict::Inconclusive);
    assert!(result.evidence[0]
        .detail
        .as_deref()
        .unwrap()
        .contains("settings provider gone"));
    assert!(!result.verdict);
}

#[test]
fn results_are_stamped() {
    let (registry, _) = build(&[(Script::Returns(Verdict::Negative), 0, false)]);
    let before = chrono::Utc::now().timestamp();
    let result = DecisiveShortCircuit.evaluate(&registry);
    assert!(result.evaluated_at >= before);
    assert_eq!(result.policy_version, "decisive-short-circuit/1");
    assert_eq!(result.digest().len(), 64);
}
