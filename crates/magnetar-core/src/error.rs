// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for magnetar operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// Invalid configuration option
    #[error("Invalid configuration: {option}: {reason}")]
    #[diagnostic(
        code(magnetar::invalid_config),
        help("{help_text}")
    )]
    InvalidConfig {
        option: String,
        reason: String,
        help_text: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(magnetar::serialization_error),
        help("Ensure the input is valid JSON or YAML")
    )]
    SerializationError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(magnetar::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        message: String,
    },
}

/// Result type alias for magnetar core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an InvalidConfig error
    pub fn invalid_config(
        option: impl Into<String>,
        reason: impl Into<String>,
        help_text: impl Into<String>,
    ) -> Self {
        Self::InvalidConfig {
            option: option.into(),
            reason: reason.into(),
            help_text: help_text.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
