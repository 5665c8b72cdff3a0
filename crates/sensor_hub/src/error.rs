//! Hub error types

use contracts::{DeviceError, SensorHandle};
use serde::Serialize;
use thiserror::Error;

/// Closed set of status codes returned to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    InvalidArgument,
    PermissionDenied,
    /// Wrong mode for the requested action
    InvalidOperation,
    /// Unknown handle or connection
    NotFound,
    /// Duplicate listener or channel registration
    AlreadyExists,
}

impl Status {
    pub fn of<T>(result: &Result<T, HubError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => e.status(),
        }
    }
}

/// Error returned by client-facing hub operations
#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("sensor {0} not found")]
    SensorNotFound(SensorHandle),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Device rejected a control call
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The hub was built outside a tokio runtime
    #[error("no tokio runtime: {0}")]
    NoRuntime(String),
}

impl HubError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Map onto the client status set
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidArgument(_) => Status::InvalidArgument,
            Self::PermissionDenied(_) => Status::PermissionDenied,
            Self::InvalidOperation(_) | Self::Device(_) | Self::NoRuntime(_) => {
                Status::InvalidOperation
            }
            Self::SensorNotFound(_) | Self::NotFound(_) => Status::NotFound,
            Self::AlreadyExists(_) => Status::AlreadyExists,
        }
    }
}

pub type HubResult<T> = Result<T, HubError>;

/// Why a background worker stopped
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Poll failed outside a reconnect; the feed cannot continue
    #[error("fatal poll error: {0}")]
    Fatal(DeviceError),

    /// A worker task panicked or was cancelled
    #[error("worker '{worker}' failed: {message}")]
    Worker { worker: &'static str, message: String },
}
