//! The evictable-pod predicate: which pods may be moved by rebalancing.

use k8s_openapi::api::core::v1::Pod;

use magnetar_core::labels::{rescheduling_disabled, STATIC_POD_ANNOTATION};
use magnetar_core::RebalancerConfig;

/// A pod is evictable iff it is Running, outside the excluded namespaces,
/// not statically sourced, not owned by a DaemonSet, and not opted out via
/// the rescheduling label.
pub fn is_evictable(pod: &Pod, config: &RebalancerConfig) -> bool {
    let running = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|p| p == "Running")
        .unwrap_or(false);
    if !running {
        return false;
    }

    let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
    if config.excluded_namespaces.contains(namespace) {
        return false;
    }

    let statically_sourced = pod
        .metadata
        .annotations
        .as_ref()
        .map(|a| a.contains_key(STATIC_POD_ANNOTATION))
        .unwrap_or(false);
    if statically_sourced {
        return false;
    }

    let daemonset_owned = pod
        .metadata
        .owner_references
        .as_ref()
        .map(|owners| owners.iter().any(|r| r.kind == "DaemonSet"))
        .unwrap_or(false);
    if daemonset_owned {
        return false;
    }

    !rescheduling_disabled(pod)
}

/// Evictable pods on the named node, sorted ascending by priority so
/// lower-priority workloads move first.
pub fn evictable_pods_on_node(
    pods: &[Pod],
    node_name: &str,
    config: &RebalancerConfig,
) -> Vec<Pod> {
    let mut candidates: Vec<Pod> = pods
        .iter()
        .filter(|pod| {
            pod.spec
                .as_ref()
                .and_then(|s| s.node_name.as_deref())
                .map(|n| n == node_name)
                .unwrap_or(false)
        })
        .filter(|pod| is_evictable(pod, config))
        .cloned()
        .collect();

    candidates.sort_by_key(pod_priority);
    candidates
}

fn pod_priority(pod: &Pod) -> i32 {
    pod.spec.as_ref().and_then(|s| s.priority).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use magnetar_core::labels::{RESCHEDULING_DISABLED, RESCHEDULING_LABEL};

    fn running_pod(name: &str, namespace: &str, node: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().node_name = Some(node.to_string());
        pod.status = Some(Default::default());
        pod.status.as_mut().unwrap().phase = Some("Running".to_string());
        pod
    }

    #[test]
    fn test_running_pod_is_evictable() {
        let config = RebalancerConfig::default();
        assert!(is_evictable(&running_pod("a", "default", "node1"), &config));
    }

    #[test]
    fn test_pending_pod_is_not_evictable() {
        let config = RebalancerConfig::default();
        let mut pod = running_pod("a", "default", "node1");
        pod.status.as_mut().unwrap().phase = Some("Pending".to_string());
        assert!(!is_evictable(&pod, &config));
    }

    #[test]
    fn test_excluded_namespace() {
        let config = RebalancerConfig::default();
        assert!(!is_evictable(
            &running_pod("a", "kube-system", "node1"),
            &config
        ));
    }

    #[test]
    fn test_static_pod() {
        let config = RebalancerConfig::default();
        let mut pod = running_pod("a", "default", "node1");
        pod.metadata.annotations = Some(
            [(STATIC_POD_ANNOTATION.to_string(), "file".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(!is_evictable(&pod, &config));
    }

    #[test]
    fn test_daemonset_owned() {
        let config = RebalancerConfig::default();
        let mut pod = running_pod("a", "default", "node1");
        pod.metadata.owner_references = Some(vec![OwnerReference {
            kind: "DaemonSet".to_string(),
            name: "logging".to_string(),
            api_version: "apps/v1".to_string(),
            uid: "ds-uid".to_string(),
            ..Default::default()
        }]);
        assert!(!is_evictable(&pod, &config));
    }

    #[test]
    fn test_opt_out_label() {
        let config = RebalancerConfig::default();
        let mut pod = running_pod("a", "default", "node1");
        pod.metadata.labels = Some(
            [(
                RESCHEDULING_LABEL.to_string(),
                RESCHEDULING_DISABLED.to_string(),
            )]
            .into_iter()
            .collect(),
        );
        assert!(!is_evictable(&pod, &config));
    }

    #[test]
    fn test_priority_ordering() {
        let config = RebalancerConfig::default();
        let mut high = running_pod("high", "default", "node1");
        high.spec.as_mut().unwrap().priority = Some(1000);
        let mut low = running_pod("low", "default", "node1");
        low.spec.as_mut().unwrap().priority = Some(10);
        let unset = running_pod("unset", "default", "node1");
        let elsewhere = running_pod("other", "default", "node2");

        let pods = vec![high, low, unset, elsewhere];
        let sorted = evictable_pods_on_node(&pods, "node1", &config);

        let names: Vec<_> = sorted
            .iter()
            .map(|p| p.metadata.name.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["unset", "low", "high"]);
    }
}
