//! Request/response bridge between the host application and the evaluator.
//!
//! ```text
//!  BridgeRequest ──► resolve ──► checkSignal ──► EvaluationPolicy ──► verdict
//!                        │
//!                        ├─────► performAction ──► SideEffectAction ──► null
//!                        │
//!                        └─────► unknown ──► not_implemented
//! ```
//!
//! Every dispatch is wrapped so that no panic or error escapes: faults come
//! back as `{"status":"error","error_kind":"InternalFault",...}`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::actions::{SideEffectAction, SurfaceLauncher, OPEN_DEVELOPER_SETTINGS};
use crate::config::GuardConfig;
use crate::error::{ErrorKind, GuardError};
use crate::probe::panic_message;
use crate::registry::{developer_mode_registry, mock_location_registry, ProbeRegistry};
use crate::settings::SettingsSource;
use crate::types::EvaluationResult;

/// Operation that evaluates a signal group.
pub const OP_CHECK_SIGNAL: &str = "checkSignal";
/// Operation that runs a side-effect action.
pub const OP_PERFORM_ACTION: &str = "performAction";

/// Signal group served by `checkSignal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalCheck {
    /// Full developer-mode registry.
    DeveloperMode,
    /// Mock-location probe alone.
    MockLocation,
}

impl SignalCheck {
    /// Argument value selecting this check.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeveloperMode => "developer-mode",
            Self::MockLocation => "mock-location",
        }
    }

    /// Parse the `name` argument.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "developer-mode" => Some(Self::DeveloperMode),
            "mock-location" => Some(Self::MockLocation),
            _ => None,
        }
    }
}

/// A resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read-only evaluation.
    CheckSignal(SignalCheck),
    /// Side-effect action, by name.
    PerformAction(String),
}

/// Incoming request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeRequest {
    /// Operation name.
    pub operation: String,
    /// Opaque argument bag. Absent and `null` both mean no arguments.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub args: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl BridgeRequest {
    /// Request without arguments.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            args: Map::new(),
        }
    }

    /// Builder-style argument.
    #[must_use]
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    /// `checkSignal` request.
    pub fn check_signal(check: SignalCheck) -> Self {
        Self::new(OP_CHECK_SIGNAL).arg("name", check.as_str())
    }

    /// `performAction` request.
    pub fn perform_action(name: &str) -> Self {
        Self::new(OP_PERFORM_ACTION).arg("name", name)
    }

    /// Resolve against the fixed operation set.
    pub fn resolve(&self) -> Result<Operation, GuardError> {
        let not_implemented = || GuardError::NotImplemented {
            operation: self.describe(),
        };

        match self.operation.as_str() {
            OP_CHECK_SIGNAL => self
                .name_arg()
                .and_then(SignalCheck::from_name)
                .map(Operation::CheckSignal)
                .ok_or_else(not_implemented),
            OP_PERFORM_ACTION => match self.name_arg() {
                Some(OPEN_DEVELOPER_SETTINGS) => {
                    Ok(Operation::PerformAction(OPEN_DEVELOPER_SETTINGS.to_string()))
                },
                _ => Err(not_implemented()),
            },
            // Method names of the original host channel.
            "isDeveloperOptionsEnabled" => Ok(Operation::CheckSignal(SignalCheck::DeveloperMode)),
            "isMockLocationEnabled" => Ok(Operation::CheckSignal(SignalCheck::MockLocation)),
            "openDeveloperOptions" => {
                Ok(Operation::PerformAction(OPEN_DEVELOPER_SETTINGS.to_string()))
            },
            _ => Err(not_implemented()),
        }
    }

    fn name_arg(&self) -> Option<&str> {
        self.args.get("name").and_then(Value::as_str)
    }

    fn flag_arg(&self, key: &str) -> Option<bool> {
        self.args.get(key).and_then(Value::as_bool)
    }

    fn describe(&self) -> String {
        match self.name_arg() {
            Some(name) => format!("{}({name})", self.operation),
            None => self.operation.clone(),
        }
    }
}

/// Outgoing response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BridgeResponse {
    /// Operation completed. `value` is a boolean for checks, `null` for
    /// actions.
    Success {
        /// Payload.
        value: Value,
        /// Full evaluation result, when requested.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diagnostics: Option<Value>,
    },
    /// Operation failed.
    Error {
        /// Classification from the fixed vocabulary.
        error_kind: ErrorKind,
        /// Diagnostic message.
        message: String,
    },
    /// Bridge alive but the operation is unsupported.
    NotImplemented {
        /// Operation as requested.
        operation: String,
    },
}

impl BridgeResponse {
    /// Error response for `err`, or `NotImplemented` for that variant.
    pub fn from_error(err: &GuardError) -> Self {
        match err {
            GuardError::NotImplemented { operation } => Self::NotImplemented {
                operation: operation.clone(),
            },
            other => Self::Error {
                error_kind: other.kind(),
                message: other.message(),
            },
        }
    }

    /// Boolean payload, if this is a successful check.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Success { value, .. } => value.as_bool(),
            _ => None,
        }
    }

    /// Error kind, if this is an error.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error { error_kind, .. } => Some(*error_kind),
            _ => None,
        }
    }

    /// Whether this is `NotImplemented`.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }
}

/// Observable dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// No request in flight.
    Idle,
    /// At least one request in flight.
    Dispatching,
}

/// Synchronous request/response dispatcher.
///
/// Registries and launcher are injected at construction; the dispatcher
/// holds no mutable state besides an in-flight counter.
pub struct BridgeDispatcher {
    config: GuardConfig,
    developer_mode: Arc<ProbeRegistry>,
    mock_location: Arc<ProbeRegistry>,
    launcher: Arc<dyn SurfaceLauncher>,
    in_flight: AtomicUsize,
}

impl BridgeDispatcher {
    /// Dispatcher over explicit registries.
    pub fn new(
        config: GuardConfig,
        developer_mode: ProbeRegistry,
        mock_location: ProbeRegistry,
        launcher: Arc<dyn SurfaceLauncher>,
    ) -> Self {
        info!(
            policy = %config.policy,
            developer_mode_probes = developer_mode.len(),
            mock_location_probes = mock_location.len(),
            "bridge dispatcher ready"
        );
        Self {
            config,
            developer_mode: Arc::new(developer_mode),
            mock_location: Arc::new(mock_location),
            launcher,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Dispatcher over the standard registries reading from `source`.
    pub fn with_settings(
        config: GuardConfig,
        source: Arc<dyn SettingsSource>,
        launcher: Arc<dyn SurfaceLauncher>,
    ) -> Self {
        let developer_mode = developer_mode_registry(Arc::clone(&source), config.mock_location_rule);
        let mock_location = mock_location_registry(source);
        Self::new(config, developer_mode, mock_location, launcher)
    }

    /// Active configuration.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> DispatcherState {
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            DispatcherState::Idle
        } else {
            DispatcherState::Dispatching
        }
    }

    /// Registry serving `check`.
    pub fn registry(&self, check: SignalCheck) -> &ProbeRegistry {
        match check {
            SignalCheck::DeveloperMode => self.developer_mode.as_ref(),
            SignalCheck::MockLocation => self.mock_location.as_ref(),
        }
    }

    /// Evaluate a signal group with the configured policy.
    pub fn evaluate(&self, check: SignalCheck) -> EvaluationResult {
        self.config.policy.policy().evaluate(self.registry(check))
    }

    /// Handle one request. Never panics.
    pub fn dispatch(&self, request: &BridgeRequest) -> BridgeResponse {
        let _in_flight = InFlight::enter(&self.in_flight);
        debug!(operation = %request.operation, "dispatching");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch_inner(request)))
            .unwrap_or_else(|payload| {
                Err(GuardError::InternalFault {
                    message: panic_message(payload.as_ref()),
                })
            });

        match outcome {
            Ok(response) => response,
            Err(err) => {
                match err.kind() {
                    ErrorKind::NotImplemented => {
                        debug!(operation = %request.operation, "operation not implemented");
                    },
                    ErrorKind::ActionFailed => {
                        warn!(operation = %request.operation, error = %err, "action failed");
                    },
                    ErrorKind::InternalFault => {
                        error!(operation = %request.operation, error = %err, "internal fault");
                    },
                }
                BridgeResponse::from_error(&err)
            },
        }
    }

    /// Handle one JSON-encoded request and return a JSON-encoded response.
    pub fn dispatch_json(&self, request: &[u8]) -> Vec<u8> {
        let response = match serde_json::from_slice::<BridgeRequest>(request) {
            Ok(request) => self.dispatch(&request),
            Err(e) => {
                error!(error = %e, "malformed bridge request");
                BridgeResponse::Error {
                    error_kind: ErrorKind::InternalFault,
                    message: format!("malformed request: {e}"),
                }
            },
        };

        serde_json::to_vec(&response).unwrap_or_else(|e| {
            error!(error = %e, "failed to encode bridge response");
            br#"{"status":"error","error_kind":"InternalFault","message":"response encoding failed"}"#
                .to_vec()
        })
    }

    fn dispatch_inner(&self, request: &BridgeRequest) -> Result<BridgeResponse, GuardError> {
        match request.resolve()? {
            Operation::CheckSignal(check) => {
                let result = self.evaluate(check);
                info!(
                    check = check.as_str(),
                    verdict = result.verdict,
                    digest = %result.digest(),
                    "signal checked"
                );

                let include_evidence = request
                    .flag_arg("include_evidence")
                    .unwrap_or(self.config.include_evidence);
                let diagnostics = if include_evidence {
                    Some(serde_json::to_value(&result).map_err(|e| {
                        GuardError::InternalFault {
                            message: format!("evidence encoding failed: {e}"),
                        }
                    })?)
                } else {
                    None
                };

                Ok(BridgeResponse::Success {
                    value: Value::Bool(result.verdict),
                    diagnostics,
                })
            },
            Operation::PerformAction(name) => {
                let action = match name.as_str() {
                    OPEN_DEVELOPER_SETTINGS => SideEffectAction::open_developer_settings(),
                    _ => return Err(GuardError::NotImplemented { operation: name }),
                };
                action.perform(self.launcher.as_ref())?;
                Ok(BridgeResponse::Success {
                    value: Value::Null,
                    diagnostics: None,
                })
            },
        }
    }
}

impl std::fmt::Debug for BridgeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDispatcher")
            .field("config", &self.config)
            .field("developer_mode", &self.developer_mode)
            .field("mock_location", &self.mock_location)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Marks a request in flight for its lifetime.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
