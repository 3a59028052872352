//! End-to-end tests through the bridge dispatcher.
//!
//! Settings come from in-memory tables or snapshot files; launches from a
//! recording launcher.

use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;

use proptest::prelude::*;
use serde_json::{json, Value};

use devguard_core::settings::{
    KEY_ADB_ENABLED, KEY_ALLOW_MOCK_LOCATION, KEY_DEVELOPMENT_SETTINGS_ENABLED,
    KEY_STAY_ON_WHILE_PLUGGED_IN,
};
use devguard_core::{
    BridgeDispatcher, BridgeRequest, BridgeResponse, DispatcherState, ErrorKind, EvaluationResult,
    EvidenceRule, FileSettings, GuardConfig, LaunchError, PolicyKind, SettingsNamespace, Signal,
    SignalCheck, StaticSettings, SurfaceLauncher, SystemSurface, Verdict,
};

/// Launcher that fails for the listed surfaces and records every call.
#[derive(Default)]
struct RecordingLauncher {
    failing: Vec<(SystemSurface, LaunchError)>,
    calls: Mutex<Vec<SystemSurface>>,
}

impl RecordingLauncher {
    fn calls(&self) -> Vec<SystemSurface> {
        self.calls.lock().unwrap().clone()
    }
}

impl SurfaceLauncher for RecordingLauncher {
    fn open(&self, surface: SystemSurface) -> Result<(), LaunchError> {
        self.calls.lock().unwrap().push(surface);
        match self.failing.iter().find(|(s, _)| *s == surface) {
            Some((_, e)) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

fn dispatcher_with(
    config: GuardConfig,
    settings: StaticSettings,
    launcher: Arc<RecordingLauncher>,
) -> BridgeDispatcher {
    BridgeDispatcher::with_settings(config, Arc::new(settings), launcher)
}

fn dispatcher(settings: StaticSettings) -> BridgeDispatcher {
    dispatcher_with(
        GuardConfig::default(),
        settings,
        Arc::new(RecordingLauncher::default()),
    )
}

fn evidence_of(response: BridgeResponse) -> EvaluationResult {
    match response {
        BridgeResponse::Success {
            diagnostics: Some(diagnostics),
            ..
        } => serde_json::from_value(diagnostics).unwrap(),
        other => panic!("expected diagnostics, got {other:?}"),
    }
}

// =============================================================================
// checkSignal
// =============================================================================

#[test]
fn debug_bridge_on_short_circuits_developer_mode() {
    let settings = StaticSettings::new()
        .with(SettingsNamespace::Global, KEY_ADB_ENABLED, 1)
        .with(SettingsNamespace::Secure, KEY_ALLOW_MOCK_LOCATION, 0);
    let response = dispatcher(settings).dispatch(
        &BridgeRequest::check_signal(SignalCheck::DeveloperMode).arg("include_evidence", true),
    );

    assert_eq!(response.as_bool(), Some(true));
    let result = evidence_of(response);
    assert_eq!(result.evidence.len(), 1);
    assert_eq!(result.evidence[0].signal, Signal::DebugBridgeEnabled);
    assert_eq!(result.evidence[0].verdict, Verdict::Positive);
}

#[test]
fn non_decisive_mock_location_still_counts() {
    // Decisive probes negative, mock location allowed: evaluation runs past
    // the first probe and the non-decisive Positive sets the verdict.
    let settings = StaticSettings::new()
        .with(SettingsNamespace::Global, KEY_ADB_ENABLED, 0)
        .with(SettingsNamespace::Global, KEY_DEVELOPMENT_SETTINGS_ENABLED, 0)
        .with(SettingsNamespace::Secure, KEY_ALLOW_MOCK_LOCATION, 1);
    let response = dispatcher(settings).dispatch(
        &BridgeRequest::check_signal(SignalCheck::DeveloperMode).arg("include_evidence", true),
    );

    assert_eq!(response.as_bool(), Some(true));
    let result = evidence_of(response);
    assert_eq!(result.evidence.len(), 4);
    assert_eq!(result.positive_count(), 1);
    assert!(result.is_justified());
}

#[test]
fn denied_settings_are_inconclusive_not_errors() {
    let settings = StaticSettings::new()
        .with_denied(SettingsNamespace::Global, KEY_ADB_ENABLED)
        .with_denied(SettingsNamespace::Global, KEY_DEVELOPMENT_SETTINGS_ENABLED)
        .with_denied(SettingsNamespace::Secure, KEY_ALLOW_MOCK_LOCATION)
        .with_denied(SettingsNamespace::Global, KEY_STAY_ON_WHILE_PLUGGED_IN);
    let response = dispatcher(settings).dispatch(
        &BridgeRequest::check_signal(SignalCheck::DeveloperMode).arg("include_evidence", true),
    );

    assert_eq!(response.as_bool(), Some(false));
    let result = evidence_of(response);
    assert!(result
        .evidence
        .iter()
        .all(|o| o.verdict == Verdict::Inconclusive));
}

#[test]
fn readable_rule_treats_present_mock_setting_as_developer_mode() {
    let config = GuardConfig {
        mock_location_rule: EvidenceRule::Readable,
        ..GuardConfig::default()
    };
    let settings = StaticSettings::new().with(SettingsNamespace::Secure, KEY_ALLOW_MOCK_LOCATION, 0);
    let dispatcher = dispatcher_with(config, settings, Arc::new(RecordingLauncher::default()));

    assert_eq!(
        dispatcher
            .dispatch(&BridgeRequest::new("isDeveloperOptionsEnabled"))
            .as_bool(),
        Some(true)
    );
    // The dedicated mock-location check still reads the value.
    assert_eq!(
        dispatcher
            .dispatch(&BridgeRequest::new("isMockLocationEnabled"))
            .as_bool(),
        Some(false)
    );
}

#[test]
fn readable_rule_unset_mock_setting_is_negative() {
    let config = GuardConfig {
        mock_location_rule: EvidenceRule::Readable,
        include_evidence: true,
        ..GuardConfig::default()
    };
    let dispatcher = dispatcher_with(
        config,
        StaticSettings::new(),
        Arc::new(RecordingLauncher::default()),
    );

    let result = evidence_of(dispatcher.dispatch(&BridgeRequest::new("isDeveloperOptionsEnabled")));
    assert!(!result.verdict);
    let mock = result
        .evidence
        .iter()
        .find(|o| o.signal == Signal::MockLocationAllowed)
        .unwrap();
    assert_eq!(mock.verdict, Verdict::Negative);
}

#[test]
fn mock_location_check_reads_single_probe() {
    let settings = StaticSettings::new()
        .with(SettingsNamespace::Global, KEY_ADB_ENABLED, 1)
        .with(SettingsNamespace::Secure, KEY_ALLOW_MOCK_LOCATION, 1);
    let response = dispatcher(settings).dispatch(
        &BridgeRequest::check_signal(SignalCheck::MockLocation).arg("include_evidence", true),
    );

    let result = evidence_of(response);
    assert!(result.verdict);
    assert_eq!(result.evidence.len(), 1);
    assert_eq!(result.evidence[0].signal, Signal::MockLocationAllowed);
}

#[test]
fn flat_or_policy_from_config() {
    let config = GuardConfig {
        policy: PolicyKind::FlatOr,
        include_evidence: true,
        ..GuardConfig::default()
    };
    let settings = StaticSettings::new().with(SettingsNamespace::Global, KEY_ADB_ENABLED, 1);
    let dispatcher = dispatcher_with(config, settings, Arc::new(RecordingLauncher::default()));

    let result = evidence_of(
        dispatcher.dispatch(&BridgeRequest::check_signal(SignalCheck::DeveloperMode)),
    );
    assert!(result.verdict);
    assert_eq!(result.evidence.len(), 4);
    assert_eq!(result.policy_version, "flat-or/1");
}

#[test]
fn settings_changes_are_seen_by_next_check() {
    let settings = Arc::new(StaticSettings::new());
    let dispatcher = BridgeDispatcher::with_settings(
        GuardConfig::default(),
        settings.clone(),
        Arc::new(RecordingLauncher::default()),
    );
    let request = BridgeRequest::check_signal(SignalCheck::MockLocation);

    assert_eq!(dispatcher.dispatch(&request).as_bool(), Some(false));
    settings.set(SettingsNamespace::Secure, KEY_ALLOW_MOCK_LOCATION, 1);
    assert_eq!(dispatcher.dispatch(&request).as_bool(), Some(true));
}

#[test]
fn snapshot_file_drives_evaluation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "{}",
        json!({
            "global": {"adb_enabled": 0, "development_settings_enabled": "1"},
            "secure": {"mock_location": 0}
        })
    )
    .unwrap();

    let dispatcher = BridgeDispatcher::with_settings(
        GuardConfig::default(),
        Arc::new(FileSettings::new(file.path())),
        Arc::new(RecordingLauncher::default()),
    );
    let result = dispatcher.evaluate(SignalCheck::DeveloperMode);
    assert!(result.verdict);
    assert_eq!(result.evidence.len(), 2);
    assert_eq!(result.evidence[1].signal, Signal::DevelopmentSettingsEnabled);
}

// =============================================================================
// performAction
// =============================================================================

#[test]
fn open_developer_settings_falls_back() {
    let launcher = Arc::new(RecordingLauncher {
        failing: vec![(
            SystemSurface::DeveloperSettings,
            LaunchError::NoHandler {
                surface: "developer-settings".into(),
            },
        )],
        ..RecordingLauncher::default()
    });
    let dispatcher = dispatcher_with(GuardConfig::default(), StaticSettings::new(), launcher.clone());

    let response = dispatcher.dispatch(&BridgeRequest::new("openDeveloperOptions"));
    assert_eq!(
        response,
        BridgeResponse::Success {
            value: Value::Null,
            diagnostics: None,
        }
    );
    assert_eq!(
        launcher.calls(),
        vec![SystemSurface::DeveloperSettings, SystemSurface::Settings]
    );
}

#[test]
fn action_failure_reports_first_reason() {
    let launcher = Arc::new(RecordingLauncher {
        failing: vec![
            (
                SystemSurface::DeveloperSettings,
                LaunchError::Rejected {
                    reason: "blocked by device policy".into(),
                },
            ),
            (SystemSurface::Settings, LaunchError::Unsupported),
        ],
        ..RecordingLauncher::default()
    });
    let dispatcher = dispatcher_with(GuardConfig::default(), StaticSettings::new(), launcher.clone());

    match dispatcher.dispatch(&BridgeRequest::perform_action("open-developer-settings")) {
        BridgeResponse::Error {
            error_kind,
            message,
        } => {
            assert_eq!(error_kind, ErrorKind::ActionFailed);
            assert!(message.contains("blocked by device policy"));
        },
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(launcher.calls().len(), 2);
}

// =============================================================================
// Wire protocol
// =============================================================================

#[test]
fn json_round_trip_through_dispatch() {
    let settings = StaticSettings::new().with(SettingsNamespace::Secure, KEY_ALLOW_MOCK_LOCATION, 1);
    let bytes = dispatcher(settings)
        .dispatch_json(br#"{"operation":"checkSignal","args":{"name":"mock-location"}}"#);
    let response: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(response, json!({"status": "success", "value": true}));
}

#[test]
fn null_args_are_treated_as_empty() {
    let settings = StaticSettings::new().with(SettingsNamespace::Global, KEY_ADB_ENABLED, 1);
    let dispatcher = dispatcher(settings);

    let unknown: BridgeResponse = serde_json::from_slice(
        &dispatcher.dispatch_json(br#"{"operation":"reboot","args":null}"#),
    )
    .unwrap();
    assert!(unknown.is_not_implemented());

    let legacy: BridgeResponse = serde_json::from_slice(
        &dispatcher.dispatch_json(br#"{"operation":"isDeveloperOptionsEnabled","args":null}"#),
    )
    .unwrap();
    assert_eq!(legacy.as_bool(), Some(true));

    let action: Value = serde_json::from_slice(
        &dispatcher.dispatch_json(br#"{"operation":"openDeveloperOptions","args":null}"#),
    )
    .unwrap();
    assert_eq!(action, json!({"status": "success", "value": null}));
}

#[test]
fn unknown_operations_are_not_implemented() {
    let dispatcher = dispatcher(StaticSettings::new());
    for request in [
        BridgeRequest::new("reboot"),
        BridgeRequest::new("checkSignal"),
        BridgeRequest::new("checkSignal").arg("name", "rooted"),
        BridgeRequest::new("performAction").arg("name", "factory-reset"),
        BridgeRequest::new("checkSignal").arg("name", 7),
    ] {
        assert!(
            dispatcher.dispatch(&request).is_not_implemented(),
            "{} should be not_implemented",
            request.operation
        );
    }
}

// =============================================================================
// Concurrency
// =============================================================================

/// Launcher that records the dispatcher state seen from inside a request.
#[derive(Default)]
struct StateRecorder {
    dispatcher: OnceLock<Weak<BridgeDispatcher>>,
    seen: Mutex<Vec<DispatcherState>>,
}

impl SurfaceLauncher for StateRecorder {
    fn open(&self, _surface: SystemSurface) -> Result<(), LaunchError> {
        if let Some(dispatcher) = self.dispatcher.get().and_then(Weak::upgrade) {
            self.seen.lock().unwrap().push(dispatcher.state());
        }
        Ok(())
    }
}

#[test]
fn state_is_dispatching_while_request_in_flight() {
    let recorder = Arc::new(StateRecorder::default());
    let dispatcher = Arc::new(BridgeDispatcher::with_settings(
        GuardConfig::default(),
        Arc::new(StaticSettings::new()),
        recorder.clone(),
    ));
    recorder
        .dispatcher
        .set(Arc::downgrade(&dispatcher))
        .unwrap();

    assert_eq!(dispatcher.state(), DispatcherState::Idle);
    let response = dispatcher.dispatch(&BridgeRequest::new("openDeveloperOptions"));
    assert_eq!(
        response,
        BridgeResponse::Success {
            value: Value::Null,
            diagnostics: None,
        }
    );
    assert_eq!(
        *recorder.seen.lock().unwrap(),
        vec![DispatcherState::Dispatching]
    );
    assert_eq!(dispatcher.state(), DispatcherState::Idle);
}

#[test]
fn concurrent_dispatch_from_many_threads() {
    let settings = StaticSettings::new().with(SettingsNamespace::Global, KEY_ADB_ENABLED, 1);
    let dispatcher = Arc::new(dispatcher(settings));

    thread::scope(|scope| {
        for worker in 0..8 {
            let dispatcher = Arc::clone(&dispatcher);
            scope.spawn(move || {
                let (check, expected) = if worker % 2 == 0 {
                    (SignalCheck::DeveloperMode, true)
                } else {
                    (SignalCheck::MockLocation, false)
                };
                for _ in 0..200 {
                    let response = dispatcher.dispatch(&BridgeRequest::check_signal(check));
                    assert_eq!(response.as_bool(), Some(expected));
                }
            });
        }
    });

    assert_eq!(dispatcher.state(), DispatcherState::Idle);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    /// Any request bytes produce a well-formed response.
    #[test]
    fn dispatch_json_always_answers(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let dispatcher = dispatcher(StaticSettings::new());
        let response: BridgeResponse =
            serde_json::from_slice(&dispatcher.dispatch_json(&bytes)).unwrap();
        let answered_success = matches!(response, BridgeResponse::Success { .. });
        prop_assert!(!answered_success);
    }

    /// Any operation name outside the fixed set is not implemented.
    #[test]
    fn arbitrary_operations_not_implemented(operation in "[a-zA-Z]{1,24}") {
        prop_assume!(![
            "checkSignal",
            "performAction",
            "isDeveloperOptionsEnabled",
            "isMockLocationEnabled",
            "openDeveloperOptions",
        ]
        .contains(&operation.as_str()));

        let response = dispatcher(StaticSettings::new()).dispatch(&BridgeRequest::new(operation));
        prop_assert!(response.is_not_implemented());
    }

    /// Arbitrary setting values never fault and always justify the verdict.
    #[test]
    fn arbitrary_settings_yield_justified_verdicts(
        adb in prop::option::of(-3i64..4),
        dev in prop::option::of(-3i64..4),
        mock in prop::option::of(-3i64..4),
        stay in prop::option::of(-3i64..8),
    ) {
        let settings = StaticSettings::new();
        for (ns, key, value) in [
            (SettingsNamespace::Global, KEY_ADB_ENABLED, adb),
            (SettingsNamespace::Global, KEY_DEVELOPMENT_SETTINGS_ENABLED, dev),
            (SettingsNamespace::Secure, KEY_ALLOW_MOCK_LOCATION, mock),
            (SettingsNamespace::Global, KEY_STAY_ON_WHILE_PLUGGED_IN, stay),
        ] {
            if let Some(v) = value {
                settings.set(ns, key, v);
            }
        }

        let result = dispatcher(settings).evaluate(SignalCheck::DeveloperMode);
        prop_assert!(result.fault.is_none());
        prop_assert!(result.is_justified());
        prop_assert_eq!(result.verdict, adb == Some(1)
            || dev == Some(1)
            || mock == Some(1)
            || stay.map_or(false, |v| v > 0));
    }
}
