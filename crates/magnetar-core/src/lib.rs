//! Magnetar Core - Fundamental types for the magnetar workload rebalancer
//!
//! This crate provides:
//! - The validated rebalancer configuration
//! - Error types with miette diagnostics
//! - The label/annotation contract shared with the host platform
//! - Resource quantity parsing and the usage calculator

pub mod config;
pub mod error;
pub mod events;
pub mod labels;
pub mod quantities;
pub mod usage;

// Re-export commonly used types
pub use config::{RebalancerConfig, Strategy};
pub use error::{CoreError, Result};
pub use events::{ClusterEvent, ClusterObject, WatchEventType};
pub use labels::MigrationStatus;
pub use quantities::ResourceQuantities;
pub use usage::NodeUsage;

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
pub use k8s_openapi::api::core::v1::{Node, Pod};
pub use k8s_openapi::api::policy::v1::PodDisruptionBudget;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Namespaced key for a pod: "<namespace>/<name>"
pub fn pod_key(pod: &Pod) -> Option<String> {
    let name = pod.metadata.name.as_deref()?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
    Some(format!("{}/{}", namespace, name))
}

/// Split a "<namespace>/<name>" key back into its parts
pub fn split_pod_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_key() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("nginx".to_string());
        pod.metadata.namespace = Some("web".to_string());
        assert_eq!(pod_key(&pod), Some("web/nginx".to_string()));

        pod.metadata.namespace = None;
        assert_eq!(pod_key(&pod), Some("default/nginx".to_string()));

        pod.metadata.name = None;
        assert_eq!(pod_key(&pod), None);
    }

    #[test]
    fn test_split_pod_key() {
        assert_eq!(split_pod_key("web/nginx"), Some(("web", "nginx")));
        assert_eq!(split_pod_key("nginx"), None);
    }
}
