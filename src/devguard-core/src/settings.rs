//! Platform settings sources.
//!
//! Probes never talk to the platform directly. They read integer settings
//! through a [`SettingsSource`], which each host binding supplies:
//!
//! - [`StaticSettings`]: in-memory table, for tests and embedding
//! - [`FileSettings`]: JSON snapshot re-read on every query (CLI)
//! - C callback and Android `Settings.*.getInt` (in `devguard-ffi`)

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ProbeError;

/// `Settings.Global.ADB_ENABLED`
pub const KEY_ADB_ENABLED: &str = "adb_enabled";
/// `Settings.Global.DEVELOPMENT_SETTINGS_ENABLED`
pub const KEY_DEVELOPMENT_SETTINGS_ENABLED: &str = "development_settings_enabled";
/// `Settings.Secure.ALLOW_MOCK_LOCATION`
pub const KEY_ALLOW_MOCK_LOCATION: &str = "mock_location";
/// `Settings.Global.STAY_ON_WHILE_PLUGGED_IN`
pub const KEY_STAY_ON_WHILE_PLUGGED_IN: &str = "stay_on_while_plugged_in";

/// Settings table a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsNamespace {
    /// Device-wide settings.
    Global,
    /// Per-user secure settings.
    Secure,
    /// Per-user system settings.
    System,
}

impl SettingsNamespace {
    /// Lowercase identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Secure => "secure",
            Self::System => "system",
        }
    }

    /// Numeric code used across the C ABI.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Global => 0,
            Self::Secure => 1,
            Self::System => 2,
        }
    }
}

impl std::fmt::Display for SettingsNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reading a setting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// Access refused by the platform.
    #[error("access to {namespace}/{key} denied")]
    PermissionDenied {
        /// Namespace.
        namespace: SettingsNamespace,
        /// Key.
        key: String,
    },

    /// The settings store cannot be reached on this host.
    #[error("settings unavailable: {reason}")]
    Unavailable {
        /// Reason.
        reason: String,
    },

    /// The stored value is not an integer.
    #[error("malformed value for {key}: {reason}")]
    Malformed {
        /// Key.
        key: String,
        /// Decoding failure.
        reason: String,
    },
}

impl From<SettingsError> for ProbeError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::PermissionDenied { .. } => ProbeError::PermissionDenied {
                reason: err.to_string(),
            },
            SettingsError::Unavailable { reason } => ProbeError::Unavailable { reason },
            SettingsError::Malformed { .. } => ProbeError::Malformed {
                reason: err.to_string(),
            },
        }
    }
}

/// Read-only access to integer platform settings.
///
/// `Ok(None)` means the key is not set. Implementations must return within
/// a bounded time and must not mutate platform state.
pub trait SettingsSource: Send + Sync {
    /// Read one integer setting.
    fn read_int(&self, namespace: SettingsNamespace, key: &str)
        -> Result<Option<i64>, SettingsError>;
}

/// In-memory settings table.
///
/// Values can be changed between evaluations to model a user toggling a
/// setting.
#[derive(Debug, Default)]
pub struct StaticSettings {
    values: RwLock<HashMap<(SettingsNamespace, String), Entry>>,
}

#[derive(Debug, Clone)]
enum Entry {
    Value(i64),
    Denied,
    Unavailable,
}

impl StaticSettings {
    /// Empty table: every key reads as not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`StaticSettings::set`].
    #[must_use]
    pub fn with(self, namespace: SettingsNamespace, key: &str, value: i64) -> Self {
        self.set(namespace, key, value);
        self
    }

    /// Builder-style [`StaticSettings::deny`].
    #[must_use]
    pub fn with_denied(self, namespace: SettingsNamespace, key: &str) -> Self {
        self.deny(namespace, key);
        self
    }

    /// Store a value.
    pub fn set(&self, namespace: SettingsNamespace, key: &str, value: i64) {
        self.put(namespace, key, Entry::Value(value));
    }

    /// Make reads of a key fail with `PermissionDenied`.
    pub fn deny(&self, namespace: SettingsNamespace, key: &str) {
        self.put(namespace, key, Entry::Denied);
    }

    /// Make reads of a key fail with `Unavailable`.
    pub fn make_unavailable(&self, namespace: SettingsNamespace, key: &str) {
        self.put(namespace, key, Entry::Unavailable);
    }

    /// Remove a key.
    pub fn clear(&self, namespace: SettingsNamespace, key: &str) {
        if let Ok(mut map) = self.values.write() {
            map.remove(&(namespace, key.to_string()));
        }
    }

    fn put(&self, namespace: SettingsNamespace, key: &str, entry: Entry) {
        if let Ok(mut map) = self.values.write() {
            map.insert((namespace, key.to_string()), entry);
        }
    }
}

impl SettingsSource for StaticSettings {
    fn read_int(
        &self,
        namespace: SettingsNamespace,
        key: &str,
    ) -> Result<Option<i64>, SettingsError> {
        let map = self.values.read().map_err(|_| SettingsError::Unavailable {
            reason: "settings table poisoned".into(),
        })?;
        match map.get(&(namespace, key.to_string())) {
            None => Ok(None),
            Some(Entry::Value(v)) => Ok(Some(*v)),
            Some(Entry::Denied) => Err(SettingsError::PermissionDenied {
                namespace,
                key: key.to_string(),
            }),
            Some(Entry::Unavailable) => Err(SettingsError::Unavailable {
                reason: format!("{namespace}/{key} not present on this build"),
            }),
        }
    }
}

/// On-disk settings snapshot.
///
/// ```json
/// {
///   "global": { "adb_enabled": 1 },
///   "secure": { "mock_location": 0 },
///   "denied": ["global/development_settings_enabled"],
///   "unavailable": ["global/stay_on_while_plugged_in"]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsSnapshot {
    /// Global table.
    pub global: BTreeMap<String, serde_json::Value>,
    /// Secure table.
    pub secure: BTreeMap<String, serde_json::Value>,
    /// System table.
    pub system: BTreeMap<String, serde_json::Value>,
    /// `namespace/key` entries whose reads are denied.
    pub denied: HashSet<String>,
    /// `namespace/key` entries missing on this build.
    pub unavailable: HashSet<String>,
}

impl SettingsSnapshot {
    fn lookup(
        &self,
        namespace: SettingsNamespace,
        key: &str,
    ) -> Result<Option<i64>, SettingsError> {
        let qualified = format!("{namespace}/{key}");
        if self.denied.contains(&qualified) {
            return Err(SettingsError::PermissionDenied {
                namespace,
                key: key.to_string(),
            });
        }
        if self.unavailable.contains(&qualified) {
            return Err(SettingsError::Unavailable {
                reason: format!("{qualified} not present on this build"),
            });
        }

        let table = match namespace {
            SettingsNamespace::Global => &self.global,
            SettingsNamespace::Secure => &self.secure,
            SettingsNamespace::System => &self.system,
        };

        match table.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Number(n)) => {
                n.as_i64().map(Some).ok_or_else(|| SettingsError::Malformed {
                    key: key.to_string(),
                    reason: format!("{n} is not an integer"),
                })
            },
            Some(serde_json::Value::String(s)) => {
                s.trim()
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|e| SettingsError::Malformed {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })
            },
            Some(other) => Err(SettingsError::Malformed {
                key: key.to_string(),
                reason: format!("unsupported JSON value {other}"),
            }),
        }
    }
}

/// Settings read from a JSON snapshot file.
///
/// The file is re-read on every query so edits are visible to the next
/// evaluation.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    /// Source backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<SettingsSnapshot, SettingsError> {
        let raw = std::fs::read(&self.path).map_err(|e| SettingsError::Unavailable {
            reason: format!("cannot read {}: {e}", self.path.display()),
        })?;
        serde_json::from_slice(&raw).map_err(|e| SettingsError::Unavailable {
            reason: format!("cannot parse {}: {e}", self.path.display()),
        })
    }
}

impl SettingsSource for FileSettings {
    fn read_int(
        &self,
        namespace: SettingsNamespace,
        key: &str,
    ) -> Result<Option<i64>, SettingsError> {
        let snapshot = self.load()?;
        let value = snapshot.lookup(namespace, key);
        debug!(
            path = %self.path.display(),
            namespace = %namespace,
            key = key,
            value = ?value,
            "FileSettings::read_int"
        );
        value
    }
}
