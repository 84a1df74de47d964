// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Rebalancer and migration executor error type
#[derive(Error, Debug, Diagnostic)]
pub enum RebalancerError {
    /// A disruption budget blocks the migration
    #[error("Migration of {pod_key} denied by disruption budget {budget}: {reason}")]
    #[diagnostic(
        code(rebalancer::budget_denied),
        help("The budget has no disruptions left; the migration is skipped this tick")
    )]
    BudgetDenied {
        pod_key: String,
        budget: String,
        reason: String,
    },

    /// One migration failed; the controller loop continues
    #[error("Migration {migration_id} failed: {reason}")]
    #[diagnostic(
        code(rebalancer::migration_failed),
        help("The source pod keeps its migration labels for post-mortem; retry happens after back-off")
    )]
    MigrationFailed {
        migration_id: String,
        reason: String,
    },

    /// The target pod did not become ready in time
    #[error("Migration {migration_id} timed out waiting for {pod_key} to become ready")]
    #[diagnostic(
        code(rebalancer::migration_timeout),
        help("The source pod is left intact; the migration is retried on a later tick")
    )]
    MigrationTimeout {
        migration_id: String,
        pod_key: String,
    },

    /// Cluster API or cache error
    #[error("Cluster error: {0}")]
    #[diagnostic(
        code(rebalancer::cluster_error),
        help("Check API server availability; transient failures are retried")
    )]
    ClusterError(#[from] magnetar_cluster::ClusterError),

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(rebalancer::core_error),
        help("This is an internal error")
    )]
    CoreError(#[from] magnetar_core::CoreError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(rebalancer::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError {
        message: String,
    },
}

/// Result type for rebalancer operations
pub type Result<T> = std::result::Result<T, RebalancerError>;

impl RebalancerError {
    /// Create a BudgetDenied error
    pub fn budget_denied(
        pod_key: impl Into<String>,
        budget: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::BudgetDenied {
            pod_key: pod_key.into(),
            budget: budget.into(),
            reason: reason.into(),
        }
    }

    /// Create a MigrationFailed error
    pub fn migration_failed(migration_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MigrationFailed {
            migration_id: migration_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a MigrationTimeout error
    pub fn migration_timeout(migration_id: impl Into<String>, pod_key: impl Into<String>) -> Self {
        Self::MigrationTimeout {
            migration_id: migration_id.into(),
            pod_key: pod_key.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
