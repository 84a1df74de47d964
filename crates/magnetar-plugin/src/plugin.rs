//! The placement plugin: Filter, Score, Reserve/Unreserve, and PreBind
//! hooks for the host placement framework.
//!
//! All operations are synchronous, single-request-scoped, and read only
//! from the cluster cache. Transient data problems fail open so a plugin
//! hiccup never wedges scheduling.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::{debug, warn};

use magnetar_cluster::ClusterCache;
use magnetar_core::labels::node_in_maintenance;
use magnetar_core::{pod_key, usage, RebalancerConfig, ResourceQuantities};

use crate::ledger::ReservationLedger;
use crate::recent::RecentTargets;
use crate::types::PlacementStatus;

/// Name under which the plugin registers with the placement framework
pub const PLUGIN_NAME: &str = "Rescheduler";

/// Hard ceiling on predicted usage at Reserve time, independent of the
/// configured overload thresholds
const RESERVE_CEILING_PERCENT: f64 = 95.0;

/// Score penalty applied to nodes that just received a migration
const RECENT_TARGET_PENALTY: i64 = 5;

/// Placement plugin instance. Owns the reservation ledger and the
/// recent-target map; both are lock-guarded and never cross the process
/// boundary.
pub struct PlacementPlugin {
    cache: Arc<ClusterCache>,
    config: RebalancerConfig,
    ledger: ReservationLedger,
    recent: Arc<RecentTargets>,
}

impl PlacementPlugin {
    pub fn new(cache: Arc<ClusterCache>, config: RebalancerConfig) -> Self {
        Self {
            cache,
            config,
            ledger: ReservationLedger::new(),
            recent: Arc::new(RecentTargets::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    /// Shared handle for the executor to record migration targets
    pub fn recent_targets(&self) -> Arc<RecentTargets> {
        Arc::clone(&self.recent)
    }

    /// Current usage of a node from cached pods, without reservations
    fn current_usage(&self, node: &Node) -> Option<magnetar_core::NodeUsage> {
        let node_name = node.metadata.name.as_deref()?;
        let pods = self.cache.pods_on_node(node_name);
        usage::node_usage(node, &pods, &self.config)
    }

    /// Admit or reject a node for an incoming pod.
    ///
    /// Rejects iff the node is overloaded in either dimension or carries
    /// the maintenance label. Missing data fails open.
    pub fn filter(&self, pod: &Pod, node: &Node) -> PlacementStatus {
        if node_in_maintenance(node) {
            return PlacementStatus::unschedulable("node is marked for maintenance");
        }

        let current = match self.current_usage(node) {
            Some(u) => u,
            None => {
                warn!(
                    pod = pod_key(pod).as_deref().unwrap_or("<unknown>"),
                    "Filter could not compute node usage; admitting"
                );
                return PlacementStatus::success();
            }
        };

        if let Some(reason) = usage::overload_reason(&current, &self.config) {
            return PlacementStatus::unschedulable(reason);
        }

        PlacementStatus::success()
    }

    /// Score a node for an incoming pod in [0, 100]; higher is better
    pub fn score(&self, pod: &Pod, node: &Node) -> i64 {
        let current = match self.current_usage(node) {
            Some(u) => u,
            None => {
                debug!(
                    pod = pod_key(pod).as_deref().unwrap_or("<unknown>"),
                    "Score could not compute node usage; returning 0"
                );
                return 0;
            }
        };

        let mut score = current.score.round() as i64;
        if self.recent.is_recent(&current.node_name) {
            score -= RECENT_TARGET_PENALTY;
        }
        score.clamp(0, 100)
    }

    /// Record an in-flight placement. Rejects when the prediction (current
    /// usage + pending reservations + this pod) would push either dimension
    /// past the hard ceiling; nothing is inserted on rejection.
    pub fn reserve(&self, pod: &Pod, node: &Node) -> PlacementStatus {
        let key = match pod_key(pod) {
            Some(k) => k,
            None => return PlacementStatus::error("pod has no name"),
        };
        let node_name = match node.metadata.name.as_deref() {
            Some(n) => n,
            None => return PlacementStatus::error("node has no name"),
        };

        let requests = usage::pod_requests(pod);
        let (cpu_percent, memory_percent) = self.predicted_percent(node, Some(&requests));

        if cpu_percent > RESERVE_CEILING_PERCENT || memory_percent > RESERVE_CEILING_PERCENT {
            return PlacementStatus::unschedulable(format!(
                "predicted usage cpu {:.1}% / memory {:.1}% exceeds the {:.0}% reservation ceiling",
                cpu_percent, memory_percent, RESERVE_CEILING_PERCENT
            ));
        }

        self.ledger.reserve(&key, node_name, requests);
        debug!(pod = %key, node = node_name, "Reserved placement");
        PlacementStatus::success()
    }

    /// Release the reservation for a pod. Idempotent.
    pub fn unreserve(&self, pod: &Pod, node: &Node) {
        let Some(key) = pod_key(pod) else { return };
        if self.ledger.unreserve(&key).is_some() {
            debug!(
                pod = %key,
                node = node.metadata.name.as_deref().unwrap_or("<unknown>"),
                "Released reservation"
            );
        }
    }

    /// Informational pre-bind check. Warns when the predicted post-bind
    /// usage exceeds the configured thresholds; never fails the bind.
    pub fn pre_bind(&self, pod: &Pod, node: &Node) -> PlacementStatus {
        // The pod's own reservation is already in the ledger at this point
        let (cpu_percent, memory_percent) = self.predicted_percent(node, None);

        if cpu_percent > self.config.cpu_threshold || memory_percent > self.config.memory_threshold
        {
            warn!(
                pod = pod_key(pod).as_deref().unwrap_or("<unknown>"),
                node = node.metadata.name.as_deref().unwrap_or("<unknown>"),
                predicted_cpu_percent = cpu_percent,
                predicted_memory_percent = memory_percent,
                "Binding will push node past its configured thresholds"
            );
        }

        PlacementStatus::success()
    }

    /// Remove reservations older than the configured TTL
    pub fn sweep_reservations(&self) -> usize {
        self.ledger.sweep(self.config.reservation_ttl())
    }

    /// Predicted usage percentages: current requests plus pending
    /// reservations on the node, plus optionally one more pod's requests.
    fn predicted_percent(&self, node: &Node, extra: Option<&ResourceQuantities>) -> (f64, f64) {
        let node_name = match node.metadata.name.as_deref() {
            Some(n) => n,
            None => return (0.0, 0.0),
        };

        let pods = self.cache.pods_on_node(node_name);
        let mut predicted = ResourceQuantities::default();
        for pod in &pods {
            let running = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .map(|p| p == "Running")
                .unwrap_or(false);
            if running {
                predicted = predicted.add(&usage::pod_requests(pod));
            }
        }
        predicted = predicted.add(&self.ledger.node_total(node_name));
        if let Some(extra) = extra {
            predicted = predicted.add(extra);
        }

        usage::usage_percent(&predicted, &usage::node_capacity(node))
    }

    #[cfg(test)]
    pub(crate) fn ledger(&self) -> &ReservationLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use magnetar_core::{ClusterEvent, ClusterObject};
    use std::collections::BTreeMap;

    fn create_test_node(name: &str, cpu: &str, memory: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node.status = Some(Default::default());
        let mut allocatable = BTreeMap::new();
        allocatable.insert("cpu".to_string(), Quantity(cpu.to_string()));
        allocatable.insert("memory".to_string(), Quantity(memory.to_string()));
        node.status.as_mut().unwrap().allocatable = Some(allocatable);
        node
    }

    fn create_test_pod(name: &str, node: Option<&str>, cpu: &str, memory: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().node_name = node.map(|n| n.to_string());
        pod.spec.as_mut().unwrap().containers = vec![Default::default()];
        pod.spec.as_mut().unwrap().containers[0].name = "app".to_string();
        pod.spec.as_mut().unwrap().containers[0].resources = Some(Default::default());
        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), Quantity(cpu.to_string()));
        requests.insert("memory".to_string(), Quantity(memory.to_string()));
        pod.spec.as_mut().unwrap().containers[0]
            .resources
            .as_mut()
            .unwrap()
            .requests = Some(requests);
        pod.status = Some(Default::default());
        pod.status.as_mut().unwrap().phase = Some("Running".to_string());
        pod
    }

    fn plugin_with_cluster(pods: Vec<Pod>) -> (PlacementPlugin, Arc<ClusterCache>) {
        let cache = Arc::new(ClusterCache::new());
        for pod in pods {
            cache.apply(&ClusterEvent::added(ClusterObject::Pod(Box::new(pod))));
        }
        let plugin = PlacementPlugin::new(Arc::clone(&cache), RebalancerConfig::default());
        (plugin, cache)
    }

    #[test]
    fn test_filter_admits_healthy_node() {
        let (plugin, _) =
            plugin_with_cluster(vec![create_test_pod("a", Some("node1"), "500m", "1Gi")]);
        let node = create_test_node("node1", "4", "8Gi");
        let incoming = create_test_pod("incoming", None, "250m", "512Mi");

        assert!(plugin.filter(&incoming, &node).is_success());
    }

    #[test]
    fn test_filter_rejects_overloaded_node() {
        // 3500m of 4000m = 87.5% > 80%
        let (plugin, _) =
            plugin_with_cluster(vec![create_test_pod("a", Some("node1"), "3500m", "1Gi")]);
        let node = create_test_node("node1", "4", "8Gi");
        let incoming = create_test_pod("incoming", None, "250m", "512Mi");

        let status = plugin.filter(&incoming, &node);
        assert!(!status.is_success());
        assert!(status.reason.unwrap().contains("cpu"));
    }

    #[test]
    fn test_filter_rejects_maintenance_node() {
        let (plugin, _) = plugin_with_cluster(vec![]);
        let mut node = create_test_node("node1", "4", "8Gi");
        node.metadata.labels = Some(
            [(
                magnetar_core::labels::MAINTENANCE_LABEL.to_string(),
                "true".to_string(),
            )]
            .into_iter()
            .collect(),
        );
        let incoming = create_test_pod("incoming", None, "250m", "512Mi");

        let status = plugin.filter(&incoming, &node);
        assert!(!status.is_success());
        assert!(status.reason.unwrap().contains("maintenance"));
    }

    #[test]
    fn test_score_bounds_and_ordering() {
        let (plugin, _) = plugin_with_cluster(vec![
            create_test_pod("a", Some("busy"), "3", "6Gi"),
            create_test_pod("b", Some("idle"), "100m", "128Mi"),
        ]);
        let busy = create_test_node("busy", "4", "8Gi");
        let idle = create_test_node("idle", "4", "8Gi");
        let incoming = create_test_pod("incoming", None, "250m", "512Mi");

        let busy_score = plugin.score(&incoming, &busy);
        let idle_score = plugin.score(&incoming, &idle);

        assert!((0..=100).contains(&busy_score));
        assert!((0..=100).contains(&idle_score));
        assert!(idle_score > busy_score);
    }

    #[test]
    fn test_score_is_deterministic() {
        let (plugin, _) =
            plugin_with_cluster(vec![create_test_pod("a", Some("node1"), "1", "2Gi")]);
        let node = create_test_node("node1", "4", "8Gi");
        let incoming = create_test_pod("incoming", None, "250m", "512Mi");

        assert_eq!(
            plugin.score(&incoming, &node),
            plugin.score(&incoming, &node)
        );
    }

    #[test]
    fn test_reserve_ceiling() {
        let (plugin, _) = plugin_with_cluster(vec![]);
        let node1 = create_test_node("node1", "1", "1Gi");
        let node2 = create_test_node("node2", "16", "64Gi");

        // 990m of 1000m = 99% > 95% ceiling
        let huge = create_test_pod("huge", None, "990m", "512Mi");
        let status = plugin.reserve(&huge, &node1);
        assert!(!status.is_success());
        assert!(plugin.ledger().is_empty());

        // The same pod fits on a larger node
        let status = plugin.reserve(&huge, &node2);
        assert!(status.is_success());
        assert_eq!(plugin.ledger().len(), 1);
    }

    #[test]
    fn test_reserve_counts_pending_reservations() {
        let (plugin, _) = plugin_with_cluster(vec![]);
        let node = create_test_node("node1", "1", "1Gi");

        // Two 500m pods: the first reserves 50%, the second would predict 100%
        let first = create_test_pod("first", None, "500m", "128Mi");
        assert!(plugin.reserve(&first, &node).is_success());

        let second = create_test_pod("second", None, "500m", "128Mi");
        let status = plugin.reserve(&second, &node);
        assert!(!status.is_success());
        assert_eq!(plugin.ledger().len(), 1);
    }

    #[test]
    fn test_reserve_unreserve_balances() {
        let (plugin, _) = plugin_with_cluster(vec![]);
        let node = create_test_node("node1", "4", "8Gi");
        let pod = create_test_pod("a", None, "500m", "1Gi");

        plugin.reserve(&pod, &node);
        assert_eq!(plugin.ledger().len(), 1);

        plugin.unreserve(&pod, &node);
        assert!(plugin.ledger().is_empty());

        // Unreserve again is a no-op
        plugin.unreserve(&pod, &node);
        assert!(plugin.ledger().is_empty());
    }

    #[test]
    fn test_pre_bind_never_fails() {
        let (plugin, _) =
            plugin_with_cluster(vec![create_test_pod("a", Some("node1"), "3500m", "7Gi")]);
        let node = create_test_node("node1", "4", "8Gi");
        let pod = create_test_pod("incoming", None, "400m", "512Mi");

        plugin.reserve(&pod, &node);
        // Over threshold: logs a warning but still succeeds
        assert!(plugin.pre_bind(&pod, &node).is_success());
    }

    #[test]
    fn test_recent_target_penalty() {
        // Node at 50% usage scores mid-range, leaving headroom below the
        // clamp for the penalty to show
        let (plugin, _) =
            plugin_with_cluster(vec![create_test_pod("a", Some("node1"), "2", "4Gi")]);
        let node = create_test_node("node1", "4", "8Gi");
        let incoming = create_test_pod("incoming", None, "250m", "512Mi");

        let before = plugin.score(&incoming, &node);
        plugin.recent_targets().record("node1");
        let after = plugin.score(&incoming, &node);

        assert!(after < before);
    }
}
