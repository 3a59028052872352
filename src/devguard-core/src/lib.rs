//! # devguard-core
//!
//! Device-integrity signal evaluation for the Atenim attendance client.
//!
//! Decides, from several independent and individually unreliable platform
//! signals, whether the device is in a state that should reduce trust in a
//! subsequently reported location check-in.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BridgeDispatcher                          │
//! │         (operation resolution, fault containment)           │
//! │                                                              │
//! │      checkSignal                       performAction         │
//! │           │                                  │               │
//! │           ▼                                  ▼               │
//! │  ┌──────────────────┐              ┌──────────────────┐     │
//! │  │ EvaluationPolicy │              │ SideEffectAction │     │
//! │  │ short-circuit/OR │              │ (ordered tries)  │     │
//! │  └──────────────────┘              └──────────────────┘     │
//! │           │                                  │               │
//! │           ▼                                  ▼               │
//! │  ┌──────────────────┐              ┌──────────────────┐     │
//! │  │  ProbeRegistry   │              │ SurfaceLauncher  │     │
//! │  │ (priority order) │              │   (injected)     │     │
//! │  └──────────────────┘              └──────────────────┘     │
//! │           │                                                  │
//! │           ▼                                                  │
//! │  ┌──────────────────┐                                       │
//! │  │ Probe → Settings │                                       │
//! │  │ Source (injected)│                                       │
//! │  └──────────────────┘                                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Properties
//!
//! - **Tri-state probes**: a probe failure is `Inconclusive`, never an error
//! - **Auditable verdicts**: every result names its policy and carries its
//!   evidence
//! - **Contained faults**: nothing panics or errors across the bridge
//! - **Stateless evaluation**: registries are immutable after construction

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::doc_markdown)] // Allow product names without backticks
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::missing_panics_doc)] // Panic documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod actions;
pub mod bridge;
pub mod config;
pub mod error;
pub mod policy;
pub mod probe;
pub mod registry;
pub mod settings;
pub mod types;

pub use actions::{
    ActionReport, SideEffectAction, SurfaceLauncher, SystemSurface, UnsupportedLauncher,
};
pub use bridge::{
    BridgeDispatcher, BridgeRequest, BridgeResponse, DispatcherState, Operation, SignalCheck,
};
pub use config::GuardConfig;
pub use error::{ErrorKind, GuardError, LaunchError, ProbeError};
pub use policy::{DecisiveShortCircuit, EvaluationPolicy, FlatOr, PolicyKind};
pub use probe::{run_probe, EvidenceRule, Observation, Probe, SettingProbe};
pub use registry::{
    developer_mode_registry, mock_location_registry, ProbeRegistry, ProbeRegistryBuilder,
    ProbeSpec,
};
pub use settings::{
    FileSettings, SettingsError, SettingsNamespace, SettingsSnapshot, SettingsSource,
    StaticSettings,
};
pub use types::{EvaluationResult, ProbeOutcome, Signal, Verdict};
