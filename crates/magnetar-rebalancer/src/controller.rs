//! The rebalancer control loop: snapshot, evaluate strategies, cap, and
//! dispatch migration decisions.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use magnetar_cluster::ClusterCache;
use magnetar_core::{usage, RebalancerConfig};

use crate::error::Result;
use crate::executor::MigrationExecutor;
use crate::strategy::{self, Decision};

/// Periodic rebalancer. One background task; migrations are dispatched to
/// the executor asynchronously so a slow migration never stalls the tick.
pub struct RebalancerController {
    cache: Arc<ClusterCache>,
    executor: Arc<MigrationExecutor>,
    config: RebalancerConfig,
}

impl RebalancerController {
    pub fn new(
        cache: Arc<ClusterCache>,
        executor: Arc<MigrationExecutor>,
        config: RebalancerConfig,
    ) -> Self {
        Self {
            cache,
            executor,
            config,
        }
    }

    /// Run the control loop until cancelled. The in-flight tick completes
    /// before the loop stops.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        if !self.config.enable_rebalancer_controller {
            info!("Rebalancer controller disabled by configuration");
            return Ok(());
        }

        info!(
            interval_seconds = self.config.rebalancing_interval_seconds,
            max_rebalance_pods = self.config.max_rebalance_pods,
            "Starting rebalancer controller"
        );

        let mut tick = tokio::time::interval(self.config.rebalancing_interval());
        // The first tick fires immediately; skip it so a fresh instance sees
        // a populated cache before planning migrations
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Rebalancer controller shutting down");
                    return Ok(());
                }
                _ = tick.tick() => {
                    self.run_tick(&token).await;
                }
            }
        }
    }

    /// Compute this tick's migration decisions from the cache
    pub fn plan(&self) -> Vec<Decision> {
        let nodes = self.cache.nodes();
        let pods = self.cache.pods();

        if nodes.is_empty() {
            debug!("No nodes in the cache; nothing to rebalance");
            return Vec::new();
        }

        let usage_map = usage::snapshot(&nodes, &pods, &self.config);
        strategy::evaluate(&usage_map, &pods, &self.config)
    }

    async fn run_tick(&self, token: &CancellationToken) {
        let decisions = self.plan();
        if decisions.is_empty() {
            debug!("Rebalance tick produced no decisions");
            return;
        }

        info!(decisions = decisions.len(), "Dispatching migration decisions");

        for decision in decisions {
            let executor = Arc::clone(&self.executor);
            let token = token.clone();
            tokio::spawn(async move {
                if let Err(e) = executor.execute(&decision, &token).await {
                    warn!(
                        pod = %decision.pod_key,
                        source = decision.source_node.as_str(),
                        target = decision.target_node.as_str(),
                        "Migration was not carried out: {}",
                        e
                    );
                }
            });
        }
    }
}

/// Periodically sweep expired reservations out of the placement plugin's
/// ledger. Runs on the rebalancing interval until cancelled.
pub async fn run_reservation_sweeper(
    plugin: Arc<magnetar_plugin::PlacementPlugin>,
    config: RebalancerConfig,
    token: CancellationToken,
) {
    let mut tick = tokio::time::interval(config.rebalancing_interval());
    tick.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Reservation sweeper shutting down");
                return;
            }
            _ = tick.tick() => {
                let removed = plugin.sweep_reservations();
                if removed > 0 {
                    debug!(removed, "Swept expired placement reservations");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Node, Pod};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use magnetar_cluster::ApiClient;
    use magnetar_core::labels::MAINTENANCE_LABEL;
    use magnetar_core::{ClusterEvent, ClusterObject};
    use magnetar_plugin::RecentTargets;
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

    fn create_test_pod(name: &str, node: &str, cpu: &str, memory: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().node_name = Some(node.to_string());
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

    fn controller_with(
        nodes: Vec<Node>,
        pods: Vec<Pod>,
        config: RebalancerConfig,
    ) -> RebalancerController {
        let cache = Arc::new(ClusterCache::new());
        for node in nodes {
            cache.apply(&ClusterEvent::added(ClusterObject::Node(Box::new(node))));
        }
        for pod in pods {
            cache.apply(&ClusterEvent::added(ClusterObject::Pod(Box::new(pod))));
        }
        let api = Arc::new(ApiClient::new("http://127.0.0.1:1"));
        let executor = Arc::new(MigrationExecutor::new(
            Arc::clone(&cache),
            api,
            Arc::new(RecentTargets::new()),
        ));
        RebalancerController::new(cache, executor, config)
    }

    #[test]
    fn test_plan_empty_cluster() {
        let controller = controller_with(vec![], vec![], RebalancerConfig::default());
        assert!(controller.plan().is_empty());
    }

    #[test]
    fn test_plan_single_node_is_quiet() {
        let controller = controller_with(
            vec![create_test_node("only", "1", "4Gi")],
            vec![create_test_pod("a", "only", "500m", "256Mi")],
            RebalancerConfig::default(),
        );
        assert!(controller.plan().is_empty());
    }

    #[test]
    fn test_plan_respects_cap_and_invariants() {
        let mut config = RebalancerConfig::default();
        config.max_rebalance_pods = 5;

        let mut draining = create_test_node("draining", "8", "32Gi");
        draining.metadata.labels = Some(
            [(MAINTENANCE_LABEL.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        );
        let nodes = vec![draining, create_test_node("healthy", "8", "32Gi")];
        let pods: Vec<Pod> = (0..8)
            .map(|i| create_test_pod(&format!("p{}", i), "draining", "100m", "128Mi"))
            .collect();

        let controller = controller_with(nodes, pods, config.clone());
        let decisions = controller.plan();

        assert_eq!(decisions.len(), 5);
        for decision in &decisions {
            assert_ne!(decision.source_node, decision.target_node);
        }
    }
}
