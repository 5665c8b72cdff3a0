//! Layered error definitions
//!
//! Categorized by source: config / device

use thiserror::Error;

use crate::SensorHandle;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration parse error with its cause
    pub fn config_parse_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by the hardware abstraction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The underlying source went away. Recoverable while the device reports
    /// that it is reconnecting.
    #[error("device connection lost")]
    DeadObject,

    /// The device does not know this handle
    #[error("unknown sensor handle {0}")]
    InvalidHandle(SensorHandle),

    /// The operation is not supported by this device
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Any other device failure
    #[error("device failure: {0}")]
    Failed(String),
}

impl DeviceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub fn is_dead_object(&self) -> bool {
        matches!(self, Self::DeadObject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message() {
        let err = ContractError::config_validation("sensors[0].handle", "must be non-zero");
        assert_eq!(
            err.to_string(),
            "config validation error at 'sensors[0].handle': must be non-zero"
        );
    }

    #[test]
    fn test_device_error_display() {
        assert_eq!(
            DeviceError::InvalidHandle(SensorHandle::new(0x1f)).to_string(),
            "unknown sensor handle 0x1f"
        );
        assert!(DeviceError::DeadObject.is_dead_object());
        assert!(!DeviceError::failed("boom").is_dead_object());
    }
}
