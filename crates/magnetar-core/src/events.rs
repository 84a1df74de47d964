use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use serde::{Deserialize, Serialize};

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A typed resource payload carried by a watch event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterObject {
    Pod(Box<Pod>),
    Node(Box<Node>),
    ReplicaSet(Box<ReplicaSet>),
    Deployment(Box<Deployment>),
    DisruptionBudget(Box<PodDisruptionBudget>),
}

impl ClusterObject {
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterObject::Pod(_) => "Pod",
            ClusterObject::Node(_) => "Node",
            ClusterObject::ReplicaSet(_) => "ReplicaSet",
            ClusterObject::Deployment(_) => "Deployment",
            ClusterObject::DisruptionBudget(_) => "PodDisruptionBudget",
        }
    }

    pub fn name(&self) -> Option<&str> {
        let metadata = match self {
            ClusterObject::Pod(p) => &p.metadata,
            ClusterObject::Node(n) => &n.metadata,
            ClusterObject::ReplicaSet(rs) => &rs.metadata,
            ClusterObject::Deployment(d) => &d.metadata,
            ClusterObject::DisruptionBudget(b) => &b.metadata,
        };
        metadata.name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        let metadata = match self {
            ClusterObject::Pod(p) => &p.metadata,
            ClusterObject::Node(n) => &n.metadata,
            ClusterObject::ReplicaSet(rs) => &rs.metadata,
            ClusterObject::Deployment(d) => &d.metadata,
            ClusterObject::DisruptionBudget(b) => &b.metadata,
        };
        metadata.namespace.as_deref()
    }
}

/// A resource event observed from the host platform's watch streams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEvent {
    /// Type of watch event (ADDED, MODIFIED, DELETED)
    pub event_type: WatchEventType,
    /// The resource object carried by the event
    pub object: ClusterObject,
}

impl ClusterEvent {
    pub fn added(object: ClusterObject) -> Self {
        Self {
            event_type: WatchEventType::Added,
            object,
        }
    }

    pub fn modified(object: ClusterObject) -> Self {
        Self {
            event_type: WatchEventType::Modified,
            object,
        }
    }

    pub fn deleted(object: ClusterObject) -> Self {
        Self {
            event_type: WatchEventType::Deleted,
            object,
        }
    }
}
