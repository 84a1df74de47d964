//! Label and annotation contract shared with the host platform.
//!
//! These keys are the observable surface of a migration: the executor
//! writes them, the state worker routes on them, and users opt pods out
//! or mark nodes for draining through them.

use k8s_openapi::api::core::v1::{Node, Pod};
use serde::{Deserialize, Serialize};

/// Label correlating the source and target pods of one migration
pub const MIGRATION_ID_LABEL: &str = "scheduler.alpha.kubernetes.io/migration-id";

/// Label carrying the migration state machine position
pub const MIGRATION_STATUS_LABEL: &str = "scheduler.alpha.kubernetes.io/migration-status";

/// Label recording the source node of a migrated pod
pub const MIGRATED_FROM_LABEL: &str = "scheduler.alpha.kubernetes.io/migrated-from";

/// Label recording the strategy that requested the migration
pub const MIGRATION_REASON_LABEL: &str = "scheduler.alpha.kubernetes.io/migration-reason";

/// Annotation with the RFC3339 timestamp at which the source was marked
pub const MIGRATION_TIME_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/migration-time";

/// Annotation with the uid of the source pod
pub const ORIGINAL_POD_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/original-pod";

/// Annotation with the name of the source pod
pub const ORIGINAL_POD_NAME_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/original-pod-name";

/// User opt-out label: value "disabled" excludes a pod from rebalancing
pub const RESCHEDULING_LABEL: &str = "scheduler.alpha.kubernetes.io/rescheduling";
pub const RESCHEDULING_DISABLED: &str = "disabled";

/// User label on nodes: value "true" marks a node for draining
pub const MAINTENANCE_LABEL: &str = "scheduler.alpha.kubernetes.io/maintenance";
pub const MAINTENANCE_TRUE: &str = "true";

/// Annotation marking statically sourced pods that must never be evicted
pub const STATIC_POD_ANNOTATION: &str = "kubernetes.io/config.source";

/// Labels identifying transient disruption budgets created by the executor
pub const CREATED_BY_LABEL: &str = "scheduler.alpha.kubernetes.io/created-by";
pub const CREATED_BY_RESCHEDULER: &str = "rescheduler";
pub const TEMPORARY_LABEL: &str = "scheduler.alpha.kubernetes.io/temporary";
pub const TEMPORARY_TRUE: &str = "true";

/// Annotation with the lifetime of a transient disruption budget, in seconds
pub const BUDGET_TTL_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/ttl-seconds";

/// Annotations stamped on a workload whose pod template was steered
pub const STEERING_MODIFIED_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/rescheduler-modified";
pub const PREFERRED_NODE_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/preferred-node";
pub const AVOID_NODE_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/avoid-node";
pub const STEERING_TIME_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/steering-time";

/// State of a migration, serialised into the migration-status label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::InProgress => "in-progress",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MigrationStatus::Pending),
            "in-progress" => Some(MigrationStatus::InProgress),
            "completed" => Some(MigrationStatus::Completed),
            "failed" => Some(MigrationStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True iff the node carries the maintenance label with value "true"
pub fn node_in_maintenance(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MAINTENANCE_LABEL))
        .map(|v| v == MAINTENANCE_TRUE)
        .unwrap_or(false)
}

/// True iff the pod opted out of rebalancing
pub fn rescheduling_disabled(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(RESCHEDULING_LABEL))
        .map(|v| v == RESCHEDULING_DISABLED)
        .unwrap_or(false)
}

/// The migration status carried by a pod's labels, if any
pub fn migration_status(pod: &Pod) -> Option<MigrationStatus> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MIGRATION_STATUS_LABEL))
        .and_then(|v| MigrationStatus::parse(v))
}

/// The migration id carried by a pod's labels, if any
pub fn migration_id(pod: &Pod) -> Option<&str> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MIGRATION_ID_LABEL))
        .map(|s| s.as_str())
}

/// All migration-related label keys the executor may attach to a pod
pub fn migration_label_keys() -> [&'static str; 4] {
    [
        MIGRATION_ID_LABEL,
        MIGRATION_STATUS_LABEL,
        MIGRATED_FROM_LABEL,
        MIGRATION_REASON_LABEL,
    ]
}

/// All migration-related annotation keys the executor may attach to a pod
pub fn migration_annotation_keys() -> [&'static str; 3] {
    [
        MIGRATION_TIME_ANNOTATION,
        ORIGINAL_POD_ANNOTATION,
        ORIGINAL_POD_NAME_ANNOTATION,
    ]
}
