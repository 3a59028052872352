//! Error types for evaluation, actions and the bridge boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single probe query.
///
/// Never crosses the bridge: the evaluator folds every variant into an
/// `Inconclusive` outcome and keeps the message as diagnostic detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The platform refused access to the underlying setting.
    #[error("Permission denied: {reason}")]
    PermissionDenied {
        /// Platform-provided reason.
        reason: String,
    },

    /// The capability does not exist on this platform build.
    #[error("Capability unavailable: {reason}")]
    Unavailable {
        /// Why the capability is unavailable.
        reason: String,
    },

    /// The setting was read but holds a value outside the expected domain.
    #[error("Unexpected value {value} for {key}")]
    UnexpectedValue {
        /// Setting key.
        key: String,
        /// Value that was read.
        value: i64,
    },

    /// The setting could not be decoded.
    #[error("Malformed setting: {reason}")]
    Malformed {
        /// Decoding failure.
        reason: String,
    },
}

/// Failure of a single side-effect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    /// No handler exists for the requested surface.
    #[error("No handler for {surface}")]
    NoHandler {
        /// Surface identifier.
        surface: String,
    },

    /// The platform rejected the launch.
    #[error("Launch rejected: {reason}")]
    Rejected {
        /// Platform-provided reason.
        reason: String,
    },

    /// Launching is not supported by this host.
    #[error("Launching is not supported on this host")]
    Unsupported,
}

/// Errors surfaced at the dispatcher boundary.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Every ordered attempt of an action failed.
    ///
    /// `reason` carries the failure of the first attempt.
    #[error("Action {action} failed: {reason}")]
    ActionFailed {
        /// Action name.
        action: String,
        /// Failure reason of the first attempt.
        reason: String,
    },

    /// The requested operation is not known to this bridge.
    #[error("Operation not implemented: {operation}")]
    NotImplemented {
        /// Operation as requested.
        operation: String,
    },

    /// Any unexpected condition during evaluation or dispatch.
    #[error("Internal fault: {message}")]
    InternalFault {
        /// Fault description.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message.
        message: String,
    },
}

impl GuardError {
    /// Wire classification of this error.
    ///
    /// Configuration problems are not part of the bridge vocabulary and are
    /// reported as internal faults if they ever reach it.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ActionFailed { .. } => ErrorKind::ActionFailed,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::InternalFault { .. } | Self::ConfigError { .. } => ErrorKind::InternalFault,
        }
    }

    /// Human readable message without the kind prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::ActionFailed { reason, .. } => reason.clone(),
            Self::NotImplemented { operation } => format!("unknown operation: {operation}"),
            Self::InternalFault { message } | Self::ConfigError { message } => message.clone(),
        }
    }
}

/// Fixed error vocabulary of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// All attempts of a side-effect action were exhausted.
    ActionFailed,
    /// Operation unknown to the dispatcher.
    NotImplemented,
    /// Unclassified fault caught at the boundary.
    InternalFault,
}

impl ErrorKind {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionFailed => "ActionFailed",
            Self::NotImplemented => "NotImplemented",
            Self::InternalFault => "InternalFault",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
