//! Error types for appvm.
//!
//! Every failure mode of the lifecycle manager is a distinct variant so that
//! callers can branch on [`Error::kind`] instead of message text. Retry policy
//! belongs to the caller; see [`Error::is_retryable`].

use crate::service::ServiceError;
use std::path::{Path, PathBuf};

/// Result type alias for appvm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by appvm.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A VM with the same name already exists for this owner.
    #[error("virtual machine '{0}' already exists")]
    AlreadyExists(String),

    /// The VM's config exists but a required companion file does not.
    #[error("virtual machine '{name}' is corrupted: {reason}")]
    Corrupted {
        /// VM name.
        name: String,
        /// What is missing or broken.
        reason: String,
    },

    /// The operation's state precondition was not met.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Required state.
        expected: String,
        /// Observed state.
        actual: String,
    },

    /// The new config cannot replace the current one.
    #[error("incompatible config: {0}")]
    IncompatibleConfig(String),

    /// The config itself is invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The VM name cannot be used as a directory name.
    #[error("invalid VM name '{name}': {reason}")]
    InvalidName {
        /// Rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The persisted config file could not be parsed.
    #[error("failed to parse config {}: {source}", .path.display())]
    ConfigParse {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The virtualization service could not be reached.
    #[error("virtualization service unreachable during {operation}: {reason}")]
    Communication {
        /// Service operation that failed.
        operation: String,
        /// Transport error description.
        reason: String,
    },

    /// The virtualization service refused the operation.
    #[error("virtualization service rejected {operation}: {reason}")]
    ServiceRejected {
        /// Service operation that failed.
        operation: String,
        /// Reason given by the service.
        reason: String,
    },

    /// A local filesystem operation failed.
    #[error("storage error during {operation} ({}): {source}", .path.display())]
    Storage {
        /// Operation that failed.
        operation: String,
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The console pipe has not been created yet.
    #[error("console output not available")]
    ConsoleUnavailable,

    /// Manager settings could not be loaded.
    #[error("failed to load settings: {0}")]
    ConfigLoad(String),

    /// Manager settings could not be saved.
    #[error("failed to save settings: {0}")]
    ConfigSave(String),
}

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::AlreadyExists`].
    AlreadyExists,
    /// See [`Error::Corrupted`].
    Corrupted,
    /// See [`Error::InvalidState`].
    InvalidState,
    /// See [`Error::IncompatibleConfig`].
    IncompatibleConfig,
    /// Invalid config, name or unparseable config file.
    InvalidInput,
    /// See [`Error::Communication`].
    CommunicationFailure,
    /// See [`Error::ServiceRejected`].
    ServiceRejected,
    /// See [`Error::Storage`].
    StorageIo,
    /// See [`Error::ConsoleUnavailable`].
    ConsoleUnavailable,
    /// Manager settings could not be loaded or saved.
    Settings,
}

impl Error {
    /// Create a storage error.
    pub fn storage(
        operation: impl Into<String>,
        path: impl AsRef<Path>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a corruption error.
    pub fn corrupted(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl ToString) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }

    /// Create an invalid name error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Convert a service failure, tagging it with the operation that failed.
    pub fn service(operation: impl Into<String>, err: ServiceError) -> Self {
        let operation = operation.into();
        match err {
            ServiceError::Communication(reason) => Self::Communication { operation, reason },
            ServiceError::Rejected(reason) => Self::ServiceRejected { operation, reason },
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Corrupted { .. } => ErrorKind::Corrupted,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::IncompatibleConfig(_) => ErrorKind::IncompatibleConfig,
            Error::InvalidConfig(_) | Error::InvalidName { .. } | Error::ConfigParse { .. } => {
                ErrorKind::InvalidInput
            }
            Error::Communication { .. } => ErrorKind::CommunicationFailure,
            Error::ServiceRejected { .. } => ErrorKind::ServiceRejected,
            Error::Storage { .. } => ErrorKind::StorageIo,
            Error::ConsoleUnavailable => ErrorKind::ConsoleUnavailable,
            Error::ConfigLoad(_) | Error::ConfigSave(_) => ErrorKind::Settings,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only transport failures and local I/O failures are potentially
    /// transient. Nothing in appvm retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CommunicationFailure | ErrorKind::StorageIo
        )
    }
}
