//! Usage calculator: pure functions deriving per-node request totals,
//! capacity ratios, composite scores, and the overload predicate from a
//! (node set, pod set) snapshot.
//!
//! Usage is computed from declared resource *requests*, not live
//! measurements. Sums use integer millicores and bytes; only the final
//! percentages are floating point.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::{Node, Pod};

use crate::config::RebalancerConfig;
use crate::labels::node_in_maintenance;
use crate::quantities::ResourceQuantities;

/// Usage band below which (in both dimensions) a node earns the load-balance bonus
const LOW_USAGE_PERCENT: f64 = 30.0;

/// Point-in-time usage entry for one node. Immutable once computed for a tick.
#[derive(Debug, Clone)]
pub struct NodeUsage {
    pub node_name: String,
    pub capacity: ResourceQuantities,
    /// Sum of requests over Running pods assigned to the node, in millicores
    pub cpu_requests: i64,
    /// Sum of requests over Running pods assigned to the node, in bytes
    pub memory_requests: i64,
    /// May exceed 100 when the node is over-committed
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub pod_count: usize,
    /// Weighted free-capacity score; higher is better
    pub score: f64,
    /// The node carries the maintenance label
    pub maintenance: bool,
}

/// Sum of requests across all containers of a pod. Unset fields contribute 0.
pub fn pod_requests(pod: &Pod) -> ResourceQuantities {
    let mut total = ResourceQuantities::default();

    let containers = match &pod.spec {
        Some(spec) => &spec.containers,
        None => return total,
    };

    for container in containers {
        if let Some(resources) = &container.resources {
            if let Some(requests) = &resources.requests {
                total = total.add(&ResourceQuantities::from_quantity_map(requests));
            }
        }
    }

    total
}

/// Allocatable capacity of a node, falling back to raw capacity
pub fn node_capacity(node: &Node) -> ResourceQuantities {
    let status = match &node.status {
        Some(s) => s,
        None => return ResourceQuantities::default(),
    };

    if let Some(allocatable) = &status.allocatable {
        return ResourceQuantities::from_quantity_map(allocatable);
    }
    if let Some(capacity) = &status.capacity {
        return ResourceQuantities::from_quantity_map(capacity);
    }

    ResourceQuantities::default()
}

/// Usage percentages per dimension. A zero-capacity dimension yields 0.
pub fn usage_percent(
    requests: &ResourceQuantities,
    capacity: &ResourceQuantities,
) -> (f64, f64) {
    let cpu = if capacity.cpu_millicores > 0 {
        requests.cpu_millicores as f64 / capacity.cpu_millicores as f64 * 100.0
    } else {
        0.0
    };
    let memory = if capacity.memory_bytes > 0 {
        requests.memory_bytes as f64 / capacity.memory_bytes as f64 * 100.0
    } else {
        0.0
    };
    (cpu, memory)
}

/// Composite free-capacity score. Lightly loaded nodes in both dimensions
/// earn the configured load-balance bonus.
pub fn node_score(cpu_percent: f64, memory_percent: f64, config: &RebalancerConfig) -> f64 {
    let mut score = (100.0 - cpu_percent) * config.cpu_score_weight
        + (100.0 - memory_percent) * config.memory_score_weight;

    if cpu_percent < LOW_USAGE_PERCENT && memory_percent < LOW_USAGE_PERCENT {
        score += config.load_balance_bonus;
    }

    score
}

/// Overload reason, or None when neither dimension exceeds its threshold
pub fn overload_reason(usage: &NodeUsage, config: &RebalancerConfig) -> Option<String> {
    if usage.cpu_usage_percent > config.cpu_threshold {
        return Some(format!(
            "cpu usage {:.1}% exceeds threshold {:.1}%",
            usage.cpu_usage_percent, config.cpu_threshold
        ));
    }
    if usage.memory_usage_percent > config.memory_threshold {
        return Some(format!(
            "memory usage {:.1}% exceeds threshold {:.1}%",
            usage.memory_usage_percent, config.memory_threshold
        ));
    }
    None
}

/// True iff either dimension exceeds its configured threshold
pub fn is_overloaded(usage: &NodeUsage, config: &RebalancerConfig) -> bool {
    overload_reason(usage, config).is_some()
}

/// True iff the pod is Running and assigned to the named node
fn pod_runs_on(pod: &Pod, node_name: &str) -> bool {
    let assigned = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .map(|n| n == node_name)
        .unwrap_or(false);

    let running = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|p| p == "Running")
        .unwrap_or(false);

    assigned && running
}

/// Usage entry for a single node given the cluster's pod list. Only Running
/// pods assigned to the node aggregate.
pub fn node_usage(node: &Node, pods: &[Pod], config: &RebalancerConfig) -> Option<NodeUsage> {
    let node_name = node.metadata.name.as_deref()?;
    let capacity = node_capacity(node);

    let mut requests = ResourceQuantities::default();
    let mut pod_count = 0;
    for pod in pods {
        if pod_runs_on(pod, node_name) {
            requests = requests.add(&pod_requests(pod));
            pod_count += 1;
        }
    }

    let (cpu_percent, memory_percent) = usage_percent(&requests, &capacity);
    let score = node_score(cpu_percent, memory_percent, config);

    Some(NodeUsage {
        node_name: node_name.to_string(),
        capacity,
        cpu_requests: requests.cpu_millicores,
        memory_requests: requests.memory_bytes,
        cpu_usage_percent: cpu_percent,
        memory_usage_percent: memory_percent,
        pod_count,
        score,
        maintenance: node_in_maintenance(node),
    })
}

/// Compute the node-usage map for a tick. Unschedulable nodes are skipped;
/// only Running pods with a node assignment aggregate.
pub fn snapshot(
    nodes: &[Node],
    pods: &[Pod],
    config: &RebalancerConfig,
) -> HashMap<String, NodeUsage> {
    let mut map = HashMap::new();

    for node in nodes {
        let unschedulable = node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false);
        if unschedulable {
            continue;
        }

        if let Some(usage) = node_usage(node, pods, config) {
            map.insert(usage.node_name.clone(), usage);
        }
    }

    map
}
