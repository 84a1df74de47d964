// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for cluster cache and API operations
#[derive(Error, Debug, Diagnostic)]
pub enum ClusterError {
    /// Resource not found
    #[error("Resource not found: {resource_key}")]
    #[diagnostic(
        code(cluster::not_found),
        help("The resource may have been deleted; re-list and retry")
    )]
    NotFound {
        resource_key: String,
    },

    /// Concurrent modification detected
    #[error("Conflict updating {resource_key}")]
    #[diagnostic(
        code(cluster::conflict),
        help("Re-read the resource and retry the update with the latest resourceVersion")
    )]
    Conflict {
        resource_key: String,
    },

    /// Eviction refused by the platform (disruption budget or rate limit)
    #[error("Eviction denied for {pod_key}: {reason}")]
    #[diagnostic(
        code(cluster::eviction_denied),
        help("A disruption budget is blocking the eviction; it will be retried on a later tick")
    )]
    EvictionDenied {
        pod_key: String,
        reason: String,
    },

    /// API request failed
    #[error("API error: {message}")]
    #[diagnostic(
        code(cluster::api_error),
        help("Check API server availability and credentials")
    )]
    ApiError {
        message: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(cluster::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError {
        message: String,
    },
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    /// Create a NotFound error
    pub fn not_found(resource_key: impl Into<String>) -> Self {
        Self::NotFound {
            resource_key: resource_key.into(),
        }
    }

    /// Create a Conflict error
    pub fn conflict(resource_key: impl Into<String>) -> Self {
        Self::Conflict {
            resource_key: resource_key.into(),
        }
    }

    /// Create an EvictionDenied error
    pub fn eviction_denied(pod_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EvictionDenied {
            pod_key: pod_key.into(),
            reason: reason.into(),
        }
    }

    /// Create an ApiError
    pub fn api_error(message: impl Into<String>) -> Self {
        Self::ApiError {
            message: message.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
