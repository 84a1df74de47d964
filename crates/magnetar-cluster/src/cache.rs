//! In-memory view of the cluster, fed by the host platform's watch events.
//!
//! The cache is read-only from the rebalancer's perspective: mutations
//! happen through the API client, and the resulting watch events flow back
//! in through `apply`. Readers get point-in-time clones.

use std::collections::HashMap;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use parking_lot::RwLock;
use tracing::debug;

use magnetar_core::{ClusterEvent, ClusterObject, WatchEventType};

/// Cluster state cache keyed by "<namespace>/<name>" (nodes by name)
#[derive(Default)]
pub struct ClusterCache {
    nodes: RwLock<HashMap<String, Node>>,
    pods: RwLock<HashMap<String, Pod>>,
    replica_sets: RwLock<HashMap<String, ReplicaSet>>,
    deployments: RwLock<HashMap<String, Deployment>>,
    budgets: RwLock<HashMap<String, PodDisruptionBudget>>,
}

fn namespaced_key(namespace: Option<&str>, name: Option<&str>) -> Option<String> {
    let name = name?;
    Some(format!("{}/{}", namespace.unwrap_or("default"), name))
}

impl ClusterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one watch event
    pub fn apply(&self, event: &ClusterEvent) {
        let deleted = event.event_type == WatchEventType::Deleted;
        match &event.object {
            ClusterObject::Node(node) => {
                let Some(name) = node.metadata.name.clone() else {
                    return;
                };
                let mut nodes = self.nodes.write();
                if deleted {
                    nodes.remove(&name);
                } else {
                    nodes.insert(name, (**node).clone());
                }
            }
            ClusterObject::Pod(pod) => {
                let Some(key) =
                    namespaced_key(pod.metadata.namespace.as_deref(), pod.metadata.name.as_deref())
                else {
                    return;
                };
                let mut pods = self.pods.write();
                if deleted {
                    pods.remove(&key);
                } else {
                    pods.insert(key, (**pod).clone());
                }
            }
            ClusterObject::ReplicaSet(rs) => {
                let Some(key) =
                    namespaced_key(rs.metadata.namespace.as_deref(), rs.metadata.name.as_deref())
                else {
                    return;
                };
                let mut sets = self.replica_sets.write();
                if deleted {
                    sets.remove(&key);
                } else {
                    sets.insert(key, (**rs).clone());
                }
            }
            ClusterObject::Deployment(deploy) => {
                let Some(key) = namespaced_key(
                    deploy.metadata.namespace.as_deref(),
                    deploy.metadata.name.as_deref(),
                ) else {
                    return;
                };
                let mut deployments = self.deployments.write();
                if deleted {
                    deployments.remove(&key);
                } else {
                    deployments.insert(key, (**deploy).clone());
                }
            }
            ClusterObject::DisruptionBudget(budget) => {
                let Some(key) = namespaced_key(
                    budget.metadata.namespace.as_deref(),
                    budget.metadata.name.as_deref(),
                ) else {
                    return;
                };
                let mut budgets = self.budgets.write();
                if deleted {
                    budgets.remove(&key);
                } else {
                    budgets.insert(key, (**budget).clone());
                }
            }
        }
        debug!(
            kind = event.object.kind(),
            name = event.object.name(),
            event = ?event.event_type,
            "Applied cluster event"
        );
    }

    /// All known nodes
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    /// All known pods
    pub fn pods(&self) -> Vec<Pod> {
        self.pods.read().values().cloned().collect()
    }

    pub fn get_node(&self, name: &str) -> Option<Node> {
        self.nodes.read().get(name).cloned()
    }

    pub fn get_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods
            .read()
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    /// Pods assigned to the named node
    pub fn pods_on_node(&self, node_name: &str) -> Vec<Pod> {
        self.pods
            .read()
            .values()
            .filter(|pod| {
                pod.spec
                    .as_ref()
                    .and_then(|s| s.node_name.as_deref())
                    .map(|n| n == node_name)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn get_replica_set(&self, namespace: &str, name: &str) -> Option<ReplicaSet> {
        self.replica_sets
            .read()
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    pub fn get_deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.deployments
            .read()
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    /// The ReplicaSet owning this pod, if any (first owner-reference hop)
    pub fn owning_replica_set(&self, pod: &Pod) -> Option<ReplicaSet> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let owners = pod.metadata.owner_references.as_ref()?;
        let rs_ref = owners.iter().find(|r| r.kind == "ReplicaSet")?;
        self.get_replica_set(namespace, &rs_ref.name)
    }

    /// The Deployment owning this ReplicaSet, if any (second owner-reference hop)
    pub fn owning_deployment(&self, rs: &ReplicaSet) -> Option<Deployment> {
        let namespace = rs.metadata.namespace.as_deref().unwrap_or("default");
        let owners = rs.metadata.owner_references.as_ref()?;
        let deploy_ref = owners.iter().find(|r| r.kind == "Deployment")?;
        self.get_deployment(namespace, &deploy_ref.name)
    }

    /// Disruption budgets in the pod's namespace whose selector matches it
    pub fn budgets_matching(&self, pod: &Pod) -> Vec<PodDisruptionBudget> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let empty = HashMap::new();
        let pod_labels: HashMap<&str, &str> = pod
            .metadata
            .labels
            .as_ref()
            .map(|labels| {
                labels
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect()
            })
            .unwrap_or(empty);

        self.budgets
            .read()
            .values()
            .filter(|budget| {
                budget.metadata.namespace.as_deref().unwrap_or("default") == namespace
            })
            .filter(|budget| {
                budget
                    .spec
                    .as_ref()
                    .and_then(|s| s.selector.as_ref())
                    .map(|selector| selector_matches(selector, &pod_labels))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// All temporary disruption budgets created by the rescheduler
    pub fn rescheduler_budgets(&self) -> Vec<PodDisruptionBudget> {
        self.budgets
            .read()
            .values()
            .filter(|budget| {
                budget
                    .metadata
                    .labels
                    .as_ref()
                    .map(|labels| {
                        labels
                            .get(magnetar_core::labels::CREATED_BY_LABEL)
                            .map(|v| v == magnetar_core::labels::CREATED_BY_RESCHEDULER)
                            .unwrap_or(false)
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// All deployments stamped with steering annotations
    pub fn steered_deployments(&self) -> Vec<Deployment> {
        self.deployments
            .read()
            .values()
            .filter(|deploy| {
                deploy
                    .metadata
                    .annotations
                    .as_ref()
                    .map(|a| a.contains_key(magnetar_core::labels::STEERING_MODIFIED_ANNOTATION))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

/// Evaluate a label selector against a pod's labels. Supports matchLabels
/// and the four matchExpressions operators.
pub fn selector_matches(selector: &LabelSelector, pod_labels: &HashMap<&str, &str>) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if pod_labels.get(key.as_str()) != Some(&value.as_str()) {
                return false;
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let actual = pod_labels.get(expr.key.as_str());
            let values = expr.values.as_deref().unwrap_or(&[]);
            let matched = match expr.operator.as_str() {
                "In" => actual.map(|v| values.iter().any(|w| w == v)).unwrap_or(false),
                "NotIn" => actual.map(|v| !values.iter().any(|w| w == v)).unwrap_or(true),
                "Exists" => actual.is_some(),
                "DoesNotExist" => actual.is_none(),
                _ => false,
            };
            if !matched {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        LabelSelectorRequirement, OwnerReference,
    };
    use std::collections::BTreeMap;

    fn test_pod(namespace: &str, name: &str, node: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().node_name = Some(node.to_string());
        pod
    }

    fn labelled(mut pod: Pod, labels: &[(&str, &str)]) -> Pod {
        pod.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        pod
    }

    #[test]
    fn test_apply_and_read() {
        let cache = ClusterCache::new();
        let pod = test_pod("default", "a", "node1");
        cache.apply(&ClusterEvent::added(ClusterObject::Pod(Box::new(
            pod.clone(),
        ))));

        assert_eq!(cache.pods().len(), 1);
        assert!(cache.get_pod("default", "a").is_some());
        assert_eq!(cache.pods_on_node("node1").len(), 1);
        assert!(cache.pods_on_node("node2").is_empty());

        cache.apply(&ClusterEvent::deleted(ClusterObject::Pod(Box::new(pod))));
        assert!(cache.get_pod("default", "a").is_none());
    }

    #[test]
    fn test_owner_walk() {
        let cache = ClusterCache::new();

        let mut pod = test_pod("default", "web-abc12-xyz", "node1");
        pod.metadata.owner_references = Some(vec![OwnerReference {
            kind: "ReplicaSet".to_string(),
            name: "web-abc12".to_string(),
            api_version: "apps/v1".to_string(),
            uid: "rs-uid".to_string(),
            ..Default::default()
        }]);

        let mut rs = ReplicaSet::default();
        rs.metadata.name = Some("web-abc12".to_string());
        rs.metadata.namespace = Some("default".to_string());
        rs.metadata.owner_references = Some(vec![OwnerReference {
            kind: "Deployment".to_string(),
            name: "web".to_string(),
            api_version: "apps/v1".to_string(),
            uid: "deploy-uid".to_string(),
            ..Default::default()
        }]);

        let mut deploy = Deployment::default();
        deploy.metadata.name = Some("web".to_string());
        deploy.metadata.namespace = Some("default".to_string());

        cache.apply(&ClusterEvent::added(ClusterObject::ReplicaSet(Box::new(
            rs,
        ))));
        cache.apply(&ClusterEvent::added(ClusterObject::Deployment(Box::new(
            deploy,
        ))));

        let rs = cache.owning_replica_set(&pod).unwrap();
        assert_eq!(rs.metadata.name.as_deref(), Some("web-abc12"));

        let deploy = cache.owning_deployment(&rs).unwrap();
        assert_eq!(deploy.metadata.name.as_deref(), Some("web"));
    }

    #[test]
    fn test_owner_walk_standalone() {
        let cache = ClusterCache::new();
        let pod = test_pod("default", "solo", "node1");
        assert!(cache.owning_replica_set(&pod).is_none());
    }

    #[test]
    fn test_budgets_matching() {
        let cache = ClusterCache::new();

        let mut budget = PodDisruptionBudget::default();
        budget.metadata.name = Some("web-pdb".to_string());
        budget.metadata.namespace = Some("default".to_string());
        budget.spec = Some(Default::default());
        let mut match_labels = BTreeMap::new();
        match_labels.insert("app".to_string(), "web".to_string());
        budget.spec.as_mut().unwrap().selector = Some(LabelSelector {
            match_labels: Some(match_labels),
            ..Default::default()
        });
        cache.apply(&ClusterEvent::added(ClusterObject::DisruptionBudget(
            Box::new(budget),
        )));

        let matching = labelled(test_pod("default", "a", "node1"), &[("app", "web")]);
        assert_eq!(cache.budgets_matching(&matching).len(), 1);

        let other_labels = labelled(test_pod("default", "b", "node1"), &[("app", "db")]);
        assert!(cache.budgets_matching(&other_labels).is_empty());

        // Same labels in a different namespace never match
        let other_namespace = labelled(test_pod("prod", "c", "node1"), &[("app", "web")]);
        assert!(cache.budgets_matching(&other_namespace).is_empty());
    }

    #[test]
    fn test_selector_expressions() {
        let labels: HashMap<&str, &str> = [("tier", "frontend")].into_iter().collect();

        let selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["frontend".to_string(), "edge".to_string()]),
            }]),
            ..Default::default()
        };
        assert!(selector_matches(&selector, &labels));

        let selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "NotIn".to_string(),
                values: Some(vec!["frontend".to_string()]),
            }]),
            ..Default::default()
        };
        assert!(!selector_matches(&selector, &labels));

        let selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "missing".to_string(),
                operator: "DoesNotExist".to_string(),
                values: None,
            }]),
            ..Default::default()
        };
        assert!(selector_matches(&selector, &labels));
    }
}
