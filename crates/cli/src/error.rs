//! Error types for the monitor session.

use sensor_hub::{DispatchError, HubError};
use thiserror::Error;

/// Failure of a monitor session
#[derive(Error, Debug)]
pub enum CliError {
    /// Hub construction or a client operation failed
    #[error("hub error: {0}")]
    Hub(#[from] HubError),

    /// A hub worker stopped abnormally
    #[error("hub worker failed: {0}")]
    Worker(#[from] DispatchError),

    /// No subscribable sensor matched the request
    #[error("no sensors to subscribe: {message}")]
    NoSensors { message: String },

    /// Generic error wrapper
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn no_sensors(message: impl Into<String>) -> Self {
        Self::NoSensors {
            message: message.into(),
        }
    }
}
