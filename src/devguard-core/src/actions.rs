//! Side-effect actions: ordered, best-effort attempts at opening a system
//! surface.
//!
//! Attempts run in order, each exactly once. The first success wins. When
//! every attempt fails the action fails with the *first* attempt's reason,
//! since that attempt is the intended, most specific one.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GuardError, LaunchError};

/// A system screen an action can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemSurface {
    /// The developer options screen.
    DeveloperSettings,
    /// The "about phone" screen that unlocks developer options.
    DeviceInfoSettings,
    /// Top-level settings.
    Settings,
}

impl SystemSurface {
    /// Stable identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeveloperSettings => "developer-settings",
            Self::DeviceInfoSettings => "device-info-settings",
            Self::Settings => "settings",
        }
    }

    /// Android intent action that opens this surface.
    #[must_use]
    pub fn android_intent_action(&self) -> &'static str {
        match self {
            Self::DeveloperSettings => "android.settings.APPLICATION_DEVELOPMENT_SETTINGS",
            Self::DeviceInfoSettings => "android.settings.DEVICE_INFO_SETTINGS",
            Self::Settings => "android.settings.SETTINGS",
        }
    }

    /// Parse a stable identifier.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::DeveloperSettings,
            Self::DeviceInfoSettings,
            Self::Settings,
        ]
        .into_iter()
        .find(|s| s.as_str() == name)
    }
}

impl std::fmt::Display for SystemSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host capability that opens system surfaces.
pub trait SurfaceLauncher: Send + Sync {
    /// Open `surface`. One call is one attempt; no internal retries.
    fn open(&self, surface: SystemSurface) -> Result<(), LaunchError>;
}

/// Launcher for hosts that cannot open any surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedLauncher;

impl SurfaceLauncher for UnsupportedLauncher {
    fn open(&self, _surface: SystemSurface) -> Result<(), LaunchError> {
        Err(LaunchError::Unsupported)
    }
}

/// Name of the standard action that opens developer options.
pub const OPEN_DEVELOPER_SETTINGS: &str = "open-developer-settings";

/// An ordered list of surfaces to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectAction {
    name: String,
    attempts: Vec<SystemSurface>,
}

/// What a successful action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    /// Action name.
    pub action: String,
    /// Surface that opened.
    pub surface: SystemSurface,
    /// Attempts made, including the successful one.
    pub attempts: usize,
}

impl SideEffectAction {
    /// Action trying `attempts` in order.
    pub fn new(name: impl Into<String>, attempts: Vec<SystemSurface>) -> Self {
        Self {
            name: name.into(),
            attempts,
        }
    }

    /// Developer options, falling back to top-level settings.
    pub fn open_developer_settings() -> Self {
        Self::new(
            OPEN_DEVELOPER_SETTINGS,
            vec![SystemSurface::DeveloperSettings, SystemSurface::Settings],
        )
    }

    /// Action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Surfaces in attempt order.
    pub fn attempts(&self) -> &[SystemSurface] {
        &self.attempts
    }

    /// Run the attempts against `launcher`.
    pub fn perform(&self, launcher: &dyn SurfaceLauncher) -> Result<ActionReport, GuardError> {
        let mut first_failure: Option<LaunchError> = None;

        for (index, surface) in self.attempts.iter().enumerate() {
            match launcher.open(*surface) {
                Ok(()) => {
                    info!(
                        action = %self.name,
                        surface = %surface,
                        attempt = index + 1,
                        "action succeeded"
                    );
                    return Ok(ActionReport {
                        action: self.name.clone(),
                        surface: *surface,
                        attempts: index + 1,
                    });
                },
                Err(e) => {
                    warn!(
                        action = %self.name,
                        surface = %surface,
                        attempt = index + 1,
                        error = %e,
                        "action attempt failed"
                    );
                    first_failure.get_or_insert(e);
                },
            }
        }

        let reason = match first_failure {
            Some(e) => e.to_string(),
            None => "no attempts configured".to_string(),
        };
        Err(GuardError::ActionFailed {
            action: self.name.clone(),
            reason,
        })
    }
}
