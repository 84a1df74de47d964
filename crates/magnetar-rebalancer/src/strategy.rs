//! Rebalancing strategies: each inspects the usage snapshot and proposes
//! zero or more migration decisions for the tick.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use magnetar_core::{pod_key, usage, NodeUsage, RebalancerConfig, Strategy};

use crate::evictable::evictable_pods_on_node;

/// One migration decision produced by a strategy
#[derive(Debug, Clone)]
pub struct Decision {
    /// "<namespace>/<name>" of the pod to move
    pub pod_key: String,
    pub source_node: String,
    pub target_node: String,
    pub strategy: Strategy,
    pub reason: String,
}

/// Pick the best migration target: the highest-scoring node that is not the
/// source, not overloaded, and not marked for maintenance. Ties break by
/// name for determinism.
pub fn select_target(
    usage_map: &HashMap<String, NodeUsage>,
    source_node: &str,
    config: &RebalancerConfig,
) -> Option<String> {
    usage_map
        .values()
        .filter(|u| u.node_name != source_node)
        .filter(|u| !u.maintenance)
        .filter(|u| !usage::is_overloaded(u, config))
        .max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.node_name.cmp(&a.node_name))
        })
        .map(|u| u.node_name.clone())
}

/// LoadBalancing: when the CPU spread between the hottest and coldest node
/// exceeds the imbalance threshold, move one evictable pod off the hottest
/// node. At most one decision per tick.
pub fn load_balancing(
    usage_map: &HashMap<String, NodeUsage>,
    pods: &[Pod],
    config: &RebalancerConfig,
) -> Vec<Decision> {
    if usage_map.len() < 2 {
        return Vec::new();
    }

    let mut by_cpu: Vec<&NodeUsage> = usage_map.values().collect();
    by_cpu.sort_by(|a, b| {
        b.cpu_usage_percent
            .partial_cmp(&a.cpu_usage_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_name.cmp(&b.node_name))
    });

    let hottest = by_cpu[0];
    let coldest = by_cpu[by_cpu.len() - 1];
    let spread = hottest.cpu_usage_percent - coldest.cpu_usage_percent;
    if spread <= config.imbalance_threshold {
        return Vec::new();
    }

    let candidates = evictable_pods_on_node(pods, &hottest.node_name, config);
    let Some(pod) = candidates.first() else {
        debug!(
            node = hottest.node_name.as_str(),
            "Imbalance detected but no evictable pod on the hottest node"
        );
        return Vec::new();
    };

    let Some(target) = select_target(usage_map, &hottest.node_name, config) else {
        debug!("Imbalance detected but no acceptable target node");
        return Vec::new();
    };

    let Some(key) = pod_key(pod) else {
        return Vec::new();
    };

    vec![Decision {
        pod_key: key,
        source_node: hottest.node_name.clone(),
        target_node: target,
        strategy: Strategy::LoadBalancing,
        reason: format!(
            "cpu spread {:.1}% between {} ({:.1}%) and {} ({:.1}%) exceeds {:.1}%",
            spread,
            hottest.node_name,
            hottest.cpu_usage_percent,
            coldest.node_name,
            coldest.cpu_usage_percent,
            config.imbalance_threshold
        ),
    }]
}

/// ResourceOptimization: drain overloaded nodes one pod at a time, lowest
/// priority first, until the node falls back under its thresholds or the
/// per-tick budget runs out.
pub fn resource_optimization(
    usage_map: &HashMap<String, NodeUsage>,
    pods: &[Pod],
    config: &RebalancerConfig,
) -> Vec<Decision> {
    let mut decisions = Vec::new();

    let mut overloaded: Vec<&NodeUsage> = usage_map
        .values()
        .filter(|u| usage::is_overloaded(u, config))
        .collect();
    overloaded.sort_by(|a, b| a.node_name.cmp(&b.node_name));

    for node in overloaded {
        let reason = usage::overload_reason(node, config).unwrap_or_default();
        let candidates = evictable_pods_on_node(pods, &node.node_name, config);

        // Simulate the node's usage as pods are peeled off
        let mut remaining = magnetar_core::ResourceQuantities::new(
            node.cpu_requests,
            node.memory_requests,
        );

        for pod in &candidates {
            if decisions.len() >= config.max_rebalance_pods {
                return decisions;
            }

            let (cpu_percent, memory_percent) =
                usage::usage_percent(&remaining, &node.capacity);
            if cpu_percent <= config.cpu_threshold && memory_percent <= config.memory_threshold {
                break;
            }

            let Some(target) = select_target(usage_map, &node.node_name, config) else {
                debug!(
                    node = node.node_name.as_str(),
                    "Overloaded node has no acceptable target; skipping"
                );
                break;
            };

            let Some(key) = pod_key(pod) else { continue };

            decisions.push(Decision {
                pod_key: key,
                source_node: node.node_name.clone(),
                target_node: target,
                strategy: Strategy::ResourceOptimization,
                reason: reason.clone(),
            });

            let requests = usage::pod_requests(pod);
            remaining = magnetar_core::ResourceQuantities::new(
                remaining.cpu_millicores - requests.cpu_millicores,
                remaining.memory_bytes - requests.memory_bytes,
            );
        }
    }

    decisions
}

/// NodeMaintenance: drain every evictable pod off maintenance-labelled
/// nodes, spreading them across the healthy nodes by re-scoring targets
/// after each assignment.
pub fn node_maintenance(
    usage_map: &HashMap<String, NodeUsage>,
    pods: &[Pod],
    config: &RebalancerConfig,
) -> Vec<Decision> {
    let mut decisions = Vec::new();

    let mut draining: Vec<&NodeUsage> =
        usage_map.values().filter(|u| u.maintenance).collect();
    draining.sort_by(|a, b| a.node_name.cmp(&b.node_name));

    if draining.is_empty() {
        return decisions;
    }

    // Working copy so each assignment shifts the next pod's target choice
    let mut simulated: HashMap<String, NodeUsage> = usage_map.clone();

    for node in draining {
        let candidates = evictable_pods_on_node(pods, &node.node_name, config);

        for pod in &candidates {
            if decisions.len() >= config.max_rebalance_pods {
                return decisions;
            }

            let Some(target) = select_target(&simulated, &node.node_name, config) else {
                debug!(
                    node = node.node_name.as_str(),
                    "Maintenance node has no acceptable target; leaving remaining pods"
                );
                break;
            };

            let Some(key) = pod_key(pod) else { continue };

            decisions.push(Decision {
                pod_key: key,
                source_node: node.node_name.clone(),
                target_node: target.clone(),
                strategy: Strategy::NodeMaintenance,
                reason: format!("node {} is marked for maintenance", node.node_name),
            });

            // Account the pod against the chosen target before the next pick
            let requests = usage::pod_requests(pod);
            if let Some(entry) = simulated.get_mut(&target) {
                entry.cpu_requests += requests.cpu_millicores;
                entry.memory_requests += requests.memory_bytes;
                let totals = magnetar_core::ResourceQuantities::new(
                    entry.cpu_requests,
                    entry.memory_requests,
                );
                let (cpu_percent, memory_percent) =
                    usage::usage_percent(&totals, &entry.capacity);
                entry.cpu_usage_percent = cpu_percent;
                entry.memory_usage_percent = memory_percent;
                entry.score = usage::node_score(cpu_percent, memory_percent, config);
                entry.pod_count += 1;
            }
        }
    }

    decisions
}

/// Evaluate the enabled strategies in their configured order
pub fn evaluate(
    usage_map: &HashMap<String, NodeUsage>,
    pods: &[Pod],
    config: &RebalancerConfig,
) -> Vec<Decision> {
    let mut decisions = Vec::new();

    for strategy in &config.enabled_strategies {
        let mut produced = match strategy {
            Strategy::LoadBalancing => load_balancing(usage_map, pods, config),
            Strategy::ResourceOptimization => resource_optimization(usage_map, pods, config),
            Strategy::NodeMaintenance => node_maintenance(usage_map, pods, config),
        };
        debug!(
            strategy = %strategy,
            decisions = produced.len(),
            "Strategy evaluated"
        );
        decisions.append(&mut produced);
    }

    decisions.truncate(config.max_rebalance_pods);
    decisions
}
