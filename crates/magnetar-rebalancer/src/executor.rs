//! The migration executor: carries out one migration decision.
//!
//! Pods owned by a replicated workload are moved by steering the workload's
//! placement preference and evicting the replica; standalone pods are moved
//! by recreating them on the target node first and evicting the source once
//! the replacement is ready. State is tracked on the pods themselves via
//! labels so a restarted instance can reconcile from the cache alone.

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use magnetar_cluster::{ApiClient, ClusterCache, ClusterError, EVICTION_GRACE_SECONDS};
use magnetar_core::labels::{self, MigrationStatus};
use magnetar_core::split_pod_key;
use magnetar_plugin::RecentTargets;

use crate::error::{RebalancerError, Result};
use crate::naming;
use crate::steering;
use crate::strategy::Decision;

const CONFLICT_RETRIES: u32 = 3;
const CONFLICT_BACKOFF: Duration = Duration::from_secs(1);

const WAIT_READY_POLL: Duration = Duration::from_secs(2);
const WAIT_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// How a pod relates to higher-level workload controllers
#[derive(Debug)]
pub enum Ownership {
    /// The pod's ReplicaSet is itself owned by a Deployment, whose
    /// controller will recreate an evicted replica
    Replicated { deployment: Deployment },
    /// Nobody recreates this pod; the executor must do it
    Standalone,
}

/// Walk pod -> ReplicaSet -> Deployment through the cache. The traversal is
/// bounded to two hops and stores no back-references.
pub fn detect_ownership(cache: &ClusterCache, pod: &Pod) -> Ownership {
    if let Some(rs) = cache.owning_replica_set(pod) {
        if let Some(deployment) = cache.owning_deployment(&rs) {
            return Ownership::Replicated { deployment };
        }
    }
    Ownership::Standalone
}

/// Reason a disruption budget blocks a migration, if it does
pub fn budget_blocks(budget: &PodDisruptionBudget) -> Option<String> {
    let status = budget.status.as_ref()?;
    if status.disruptions_allowed <= 0 {
        let name = budget.metadata.name.as_deref().unwrap_or("<unnamed>");
        return Some(format!(
            "budget {} has {} disruptions allowed",
            name, status.disruptions_allowed
        ));
    }
    None
}

/// Executes migration decisions. Errors are local to one migration and
/// never abort the controller loop.
pub struct MigrationExecutor {
    cache: Arc<ClusterCache>,
    api: Arc<ApiClient>,
    recent: Arc<RecentTargets>,
}

impl MigrationExecutor {
    pub fn new(cache: Arc<ClusterCache>, api: Arc<ApiClient>, recent: Arc<RecentTargets>) -> Self {
        Self { cache, api, recent }
    }

    /// Carry out one migration decision
    pub async fn execute(&self, decision: &Decision, token: &CancellationToken) -> Result<()> {
        let (namespace, name) = split_pod_key(&decision.pod_key).ok_or_else(|| {
            RebalancerError::internal_error(format!("malformed pod key {}", decision.pod_key))
        })?;

        let Some(pod) = self.cache.get_pod(namespace, name) else {
            debug!(pod = %decision.pod_key, "Pod vanished before migration; skipping");
            return Ok(());
        };

        // The snapshot may be stale: only migrate if the pod is still where
        // the decision saw it
        let current_node = pod.spec.as_ref().and_then(|s| s.node_name.as_deref());
        if current_node != Some(decision.source_node.as_str()) {
            debug!(
                pod = %decision.pod_key,
                expected = decision.source_node.as_str(),
                actual = current_node.unwrap_or("<none>"),
                "Pod moved since the snapshot; skipping"
            );
            return Ok(());
        }

        self.preflight_budgets(&pod, &decision.pod_key)?;

        let result = match detect_ownership(&self.cache, &pod) {
            Ownership::Replicated { deployment } => {
                self.execute_replicated(&pod, deployment, decision).await
            }
            Ownership::Standalone => self.execute_standalone(&pod, decision, token).await,
        };

        match &result {
            Ok(()) => {
                self.recent.record(&decision.target_node);
                info!(
                    pod = %decision.pod_key,
                    source = decision.source_node.as_str(),
                    target = decision.target_node.as_str(),
                    strategy = %decision.strategy,
                    "Rescheduled"
                );
            }
            Err(e) => {
                warn!(
                    pod = %decision.pod_key,
                    strategy = %decision.strategy,
                    "Migration failed: {}",
                    e
                );
            }
        }
        result
    }

    /// Reject the migration when any matching disruption budget has no
    /// disruptions left
    fn preflight_budgets(&self, pod: &Pod, pod_key: &str) -> Result<()> {
        for budget in self.cache.budgets_matching(pod) {
            let budget_name = budget
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| "<unnamed>".to_string());
            if let Some(reason) = budget_blocks(&budget) {
                return Err(RebalancerError::budget_denied(pod_key, budget_name, reason));
            }
            debug!(
                pod = pod_key,
                budget = budget_name.as_str(),
                "Disruption budget permits migration"
            );
        }
        Ok(())
    }

    /// Replicated path: steer the workload's placement preference toward
    /// the target, protect its pods with a temporary budget, then evict the
    /// source replica and let the workload controller recreate it.
    async fn execute_replicated(
        &self,
        pod: &Pod,
        deployment: Deployment,
        decision: &Decision,
    ) -> Result<()> {
        let migration_id = new_migration_id();
        let fragment = naming::id_fragment(&migration_id).to_string();

        let deploy_namespace = deployment
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let deploy_name = deployment
            .metadata
            .name
            .clone()
            .ok_or_else(|| RebalancerError::internal_error("Deployment has no name"))?;

        // 1. Steer the pod template toward the target node
        self.steer_deployment(&deploy_namespace, &deploy_name, decision)
            .await?;

        // 2. Protect the workload while the replacement comes up. Failure
        // here is not fatal: the budget is belt-and-braces and the eviction
        // endpoint still honours user budgets.
        let budget = steering::build_temporary_budget(&deployment, &fragment);
        let budget_name = budget
            .as_ref()
            .and_then(|b| b.metadata.name.clone());
        if let Some(budget) = &budget {
            if let Err(e) = self.api.create_budget(budget).await {
                warn!(
                    deployment = deploy_name.as_str(),
                    "Could not create temporary disruption budget: {}", e
                );
            }
        }

        // 3. Evict; the workload controller recreates the replica under the
        // steered preference
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| RebalancerError::internal_error("Pod has no name"))?;
        if let Err(e) = self.api.evict_pod(namespace, name, EVICTION_GRACE_SECONDS).await {
            // Roll back the steering we added; the replacement should not be
            // biased by a migration that never happened
            if let Err(cleanup_err) =
                steering::remove_steering_from(&self.api, &deploy_namespace, &deploy_name).await
            {
                error!(
                    deployment = deploy_name.as_str(),
                    "Rollback of steering failed: {}", cleanup_err
                );
            }
            if let Some(budget_name) = &budget_name {
                let _ = self.api.delete_budget(&deploy_namespace, budget_name).await;
            }
            return Err(e.into());
        }

        // 4. Deferred cleanup of the steering terms and the temporary budget
        let api = Arc::clone(&self.api);
        let cleanup_namespace = deploy_namespace.clone();
        let cleanup_name = deploy_name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(steering::STEERING_TTL).await;
            if let Err(e) =
                steering::remove_steering_from(&api, &cleanup_namespace, &cleanup_name).await
            {
                warn!(
                    deployment = cleanup_name.as_str(),
                    "Deferred steering cleanup failed; the cleanup worker will retry: {}", e
                );
            }
            if let Some(budget_name) = budget_name {
                if let Err(e) = api.delete_budget(&cleanup_namespace, &budget_name).await {
                    warn!(
                        budget = budget_name.as_str(),
                        "Deferred budget cleanup failed; the cleanup worker will retry: {}", e
                    );
                }
            }
        });

        Ok(())
    }

    /// Read-modify-update the deployment with steering terms, retrying on
    /// conflict
    async fn steer_deployment(
        &self,
        namespace: &str,
        name: &str,
        decision: &Decision,
    ) -> Result<()> {
        for attempt in 0..CONFLICT_RETRIES {
            let mut deploy = self.api.get_deployment(namespace, name).await?;
            steering::apply_steering(
                &mut deploy,
                &decision.target_node,
                &decision.source_node,
                Utc::now(),
            );

            match self.api.update_deployment(&deploy).await {
                Ok(_) => {
                    debug!(
                        deployment = format!("{}/{}", namespace, name).as_str(),
                        target = decision.target_node.as_str(),
                        avoid = decision.source_node.as_str(),
                        "Steered workload preference"
                    );
                    return Ok(());
                }
                Err(ClusterError::Conflict { .. }) if attempt + 1 < CONFLICT_RETRIES => {
                    tokio::time::sleep(CONFLICT_BACKOFF).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RebalancerError::internal_error(format!(
            "steering of {}/{} kept conflicting",
            namespace, name
        )))
    }

    /// Standalone path: mark the source, recreate it on the target node,
    /// wait for readiness, then evict the source.
    async fn execute_standalone(
        &self,
        pod: &Pod,
        decision: &Decision,
        token: &CancellationToken,
    ) -> Result<()> {
        let migration_id = new_migration_id();
        let fragment = naming::id_fragment(&migration_id).to_string();
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| RebalancerError::internal_error("Pod has no name"))?;

        // 1. Mark the source
        let source = self
            .mark_source(namespace, name, decision, &migration_id)
            .await?;

        // 2. Create the replacement on the target node
        let target = build_target_pod(&source, decision, &migration_id, &fragment);
        let target_name = target
            .metadata
            .name
            .clone()
            .unwrap_or_default();
        if let Err(e) = self.api.create_pod(&target).await {
            self.mark_failed(namespace, name, &migration_id).await;
            return Err(e.into());
        }

        // 3. Source enters in-progress
        if let Err(e) = self
            .set_status_label(namespace, name, MigrationStatus::InProgress)
            .await
        {
            self.mark_failed(namespace, name, &migration_id).await;
            return Err(e);
        }

        // 4. Wait for the replacement to become Ready
        if let Err(e) = self
            .wait_for_ready(namespace, &target_name, &migration_id, token)
            .await
        {
            self.mark_failed(namespace, name, &migration_id).await;
            return Err(e);
        }

        // 5. Evict the source
        if let Err(e) = self
            .api
            .evict_pod(namespace, name, EVICTION_GRACE_SECONDS)
            .await
        {
            self.mark_failed(namespace, name, &migration_id).await;
            return Err(e.into());
        }

        // The source is gone; completion is recorded on the target, where
        // the state worker will strip the migration metadata
        if let Err(e) = self
            .set_status_label(namespace, &target_name, MigrationStatus::Completed)
            .await
        {
            warn!(
                pod = format!("{}/{}", namespace, target_name).as_str(),
                "Could not mark target completed; the cleanup worker will catch it: {}", e
            );
        }

        Ok(())
    }

    /// Stamp migration labels and annotations on the source pod, retrying
    /// on write conflicts. Idempotent: re-marking overwrites the same keys.
    async fn mark_source(
        &self,
        namespace: &str,
        name: &str,
        decision: &Decision,
        migration_id: &str,
    ) -> Result<Pod> {
        for attempt in 0..CONFLICT_RETRIES {
            let mut pod = self.api.get_pod(namespace, name).await?;

            let pod_labels = pod.metadata.labels.get_or_insert_with(Default::default);
            pod_labels.insert(
                labels::MIGRATION_ID_LABEL.to_string(),
                migration_id.to_string(),
            );
            pod_labels.insert(
                labels::MIGRATION_STATUS_LABEL.to_string(),
                MigrationStatus::Pending.as_str().to_string(),
            );
            pod_labels.insert(
                labels::MIGRATED_FROM_LABEL.to_string(),
                decision.source_node.clone(),
            );
            pod_labels.insert(
                labels::MIGRATION_REASON_LABEL.to_string(),
                decision.strategy.to_string(),
            );

            let annotations = pod.metadata.annotations.get_or_insert_with(Default::default);
            annotations.insert(
                labels::MIGRATION_TIME_ANNOTATION.to_string(),
                Utc::now().to_rfc3339(),
            );

            match self.api.update_pod(&pod).await {
                Ok(updated) => return Ok(updated),
                Err(ClusterError::Conflict { .. }) if attempt + 1 < CONFLICT_RETRIES => {
                    tokio::time::sleep(CONFLICT_BACKOFF).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RebalancerError::internal_error(format!(
            "marking {}/{} kept conflicting",
            namespace, name
        )))
    }

    /// Update the migration-status label on a pod with conflict retry
    async fn set_status_label(
        &self,
        namespace: &str,
        name: &str,
        status: MigrationStatus,
    ) -> Result<()> {
        for attempt in 0..CONFLICT_RETRIES {
            let mut pod = self.api.get_pod(namespace, name).await?;
            pod.metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert(
                    labels::MIGRATION_STATUS_LABEL.to_string(),
                    status.as_str().to_string(),
                );

            match self.api.update_pod(&pod).await {
                Ok(_) => return Ok(()),
                Err(ClusterError::Conflict { .. }) if attempt + 1 < CONFLICT_RETRIES => {
                    tokio::time::sleep(CONFLICT_BACKOFF).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RebalancerError::internal_error(format!(
            "status update of {}/{} kept conflicting",
            namespace, name
        )))
    }

    /// Best-effort transition of the source to failed
    async fn mark_failed(&self, namespace: &str, name: &str, migration_id: &str) {
        if let Err(e) = self
            .set_status_label(namespace, name, MigrationStatus::Failed)
            .await
        {
            error!(
                pod = format!("{}/{}", namespace, name).as_str(),
                migration_id,
                "Could not mark migration failed: {}",
                e
            );
        }
    }

    /// Poll the target pod until its Ready condition is true. Aborts on a
    /// Failed phase, the 5-minute ceiling, or cancellation.
    async fn wait_for_ready(
        &self,
        namespace: &str,
        name: &str,
        migration_id: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();
        let pod_key = format!("{}/{}", namespace, name);

        loop {
            if token.is_cancelled() {
                return Err(RebalancerError::internal_error(
                    "cancelled while waiting for target readiness",
                ));
            }
            if started.elapsed() >= WAIT_READY_TIMEOUT {
                return Err(RebalancerError::migration_timeout(migration_id, pod_key));
            }

            match self.api.get_pod(namespace, name).await {
                Ok(pod) => {
                    let phase = pod
                        .status
                        .as_ref()
                        .and_then(|s| s.phase.as_deref())
                        .unwrap_or("");
                    if phase == "Failed" {
                        return Err(RebalancerError::migration_failed(
                            migration_id,
                            format!("target pod {} entered Failed phase", pod_key),
                        ));
                    }
                    if pod_is_ready(&pod) {
                        return Ok(());
                    }
                }
                Err(ClusterError::NotFound { .. }) => {
                    // Creation may not have landed in the cache-backed API yet
                    debug!(pod = %pod_key, "Target pod not visible yet");
                }
                Err(e) => {
                    warn!(pod = %pod_key, "Readiness poll failed: {}", e);
                }
            }

            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(WAIT_READY_POLL) => {}
            }
        }
    }
}

fn new_migration_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Deep-copy the source pod into a replacement bound to the target node:
/// identity fields cleared, deterministic name, migration metadata attached.
pub fn build_target_pod(
    source: &Pod,
    decision: &Decision,
    migration_id: &str,
    fragment: &str,
) -> Pod {
    let mut target = source.clone();

    let original_name = source.metadata.name.as_deref().unwrap_or("pod");
    target.metadata.name = Some(naming::standalone_target_name(original_name, fragment));
    target.metadata.resource_version = None;
    target.metadata.uid = None;
    target.metadata.creation_timestamp = None;
    target.metadata.deletion_timestamp = None;
    target.metadata.owner_references = None;
    target.metadata.managed_fields = None;
    target.status = None;

    if let Some(spec) = target.spec.as_mut() {
        spec.node_name = Some(decision.target_node.clone());
    }

    let target_labels = target.metadata.labels.get_or_insert_with(Default::default);
    target_labels.insert(
        labels::MIGRATION_ID_LABEL.to_string(),
        migration_id.to_string(),
    );
    target_labels.insert(
        labels::MIGRATION_STATUS_LABEL.to_string(),
        MigrationStatus::InProgress.as_str().to_string(),
    );
    target_labels.insert(
        labels::MIGRATED_FROM_LABEL.to_string(),
        decision.source_node.clone(),
    );
    target_labels.insert(
        labels::MIGRATION_REASON_LABEL.to_string(),
        decision.strategy.to_string(),
    );

    let annotations = target.metadata.annotations.get_or_insert_with(Default::default);
    annotations.insert(
        labels::MIGRATION_TIME_ANNOTATION.to_string(),
        Utc::now().to_rfc3339(),
    );
    if let Some(uid) = source.metadata.uid.as_deref() {
        annotations.insert(labels::ORIGINAL_POD_ANNOTATION.to_string(), uid.to_string());
    }
    annotations.insert(
        labels::ORIGINAL_POD_NAME_ANNOTATION.to_string(),
        original_name.to_string(),
    );

    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::ReplicaSet;
    use k8s_openapi::api::policy::v1::PodDisruptionBudgetStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use magnetar_core::{ClusterEvent, ClusterObject, Strategy};

    fn test_pod(namespace: &str, name: &str, node: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.uid = Some(format!("{}-uid", name));
        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().node_name = Some(node.to_string());
        pod.status = Some(Default::default());
        pod.status.as_mut().unwrap().phase = Some("Running".to_string());
        pod
    }

    fn test_decision(pod_key: &str) -> Decision {
        Decision {
            pod_key: pod_key.to_string(),
            source_node: "node-a".to_string(),
            target_node: "node-b".to_string(),
            strategy: Strategy::LoadBalancing,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn test_detect_ownership_replicated() {
        let cache = ClusterCache::new();

        let mut pod = test_pod("default", "web-abc12-xyz", "node-a");
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

        cache.apply(&ClusterEvent::added(ClusterObject::ReplicaSet(Box::new(rs))));
        cache.apply(&ClusterEvent::added(ClusterObject::Deployment(Box::new(
            deploy,
        ))));

        match detect_ownership(&cache, &pod) {
            Ownership::Replicated { deployment } => {
                assert_eq!(deployment.metadata.name.as_deref(), Some("web"));
            }
            Ownership::Standalone => panic!("expected replicated ownership"),
        }
    }

    #[test]
    fn test_detect_ownership_orphan_replica_set() {
        // A ReplicaSet without a Deployment parent counts as standalone
        let cache = ClusterCache::new();

        let mut pod = test_pod("default", "web-abc12-xyz", "node-a");
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
        cache.apply(&ClusterEvent::added(ClusterObject::ReplicaSet(Box::new(rs))));

        assert!(matches!(
            detect_ownership(&cache, &pod),
            Ownership::Standalone
        ));
    }

    #[test]
    fn test_budget_blocks() {
        let mut budget = PodDisruptionBudget::default();
        budget.metadata.name = Some("web-pdb".to_string());

        // No status recorded: does not block
        assert!(budget_blocks(&budget).is_none());

        budget.status = Some(PodDisruptionBudgetStatus {
            disruptions_allowed: 0,
            ..Default::default()
        });
        let reason = budget_blocks(&budget).unwrap();
        assert!(reason.contains("web-pdb"));

        budget.status.as_mut().unwrap().disruptions_allowed = 2;
        assert!(budget_blocks(&budget).is_none());
    }

    #[test]
    fn test_build_target_pod() {
        let mut source = test_pod("default", "worker", "node-a");
        source.metadata.resource_version = Some("42".to_string());
        source.metadata.labels = Some(
            [("app".to_string(), "worker".to_string())]
                .into_iter()
                .collect(),
        );

        let decision = test_decision("default/worker");
        let target = build_target_pod(&source, &decision, "0123456789abcdef", "0123456789");

        assert_eq!(
            target.metadata.name.as_deref(),
            Some("worker-migrated-0123456789")
        );
        assert!(target.metadata.uid.is_none());
        assert!(target.metadata.resource_version.is_none());
        assert!(target.status.is_none());
        assert_eq!(
            target.spec.as_ref().unwrap().node_name.as_deref(),
            Some("node-b")
        );

        let target_labels = target.metadata.labels.as_ref().unwrap();
        // Application labels survive the copy
        assert_eq!(target_labels.get("app").map(|s| s.as_str()), Some("worker"));
        assert_eq!(
            target_labels
                .get(labels::MIGRATION_ID_LABEL)
                .map(|s| s.as_str()),
            Some("0123456789abcdef")
        );
        assert_eq!(
            target_labels
                .get(labels::MIGRATED_FROM_LABEL)
                .map(|s| s.as_str()),
            Some("node-a")
        );

        let annotations = target.metadata.annotations.as_ref().unwrap();
        assert_eq!(
            annotations
                .get(labels::ORIGINAL_POD_ANNOTATION)
                .map(|s| s.as_str()),
            Some("worker-uid")
        );
        assert_eq!(
            annotations
                .get(labels::ORIGINAL_POD_NAME_ANNOTATION)
                .map(|s| s.as_str()),
            Some("worker")
        );
    }

    #[tokio::test]
    async fn test_execute_skips_vanished_pod() {
        let cache = Arc::new(ClusterCache::new());
        let api = Arc::new(ApiClient::new("http://127.0.0.1:1"));
        let executor = MigrationExecutor::new(cache, api, Arc::new(RecentTargets::new()));

        let decision = test_decision("default/gone");
        let token = CancellationToken::new();
        assert!(executor.execute(&decision, &token).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_skips_moved_pod() {
        let cache = Arc::new(ClusterCache::new());
        // The pod is on node-c, not the decision's node-a
        cache.apply(&ClusterEvent::added(ClusterObject::Pod(Box::new(test_pod(
            "default", "drifter", "node-c",
        )))));
        let api = Arc::new(ApiClient::new("http://127.0.0.1:1"));
        let executor = MigrationExecutor::new(cache, api, Arc::new(RecentTargets::new()));

        let decision = test_decision("default/drifter");
        let token = CancellationToken::new();
        assert!(executor.execute(&decision, &token).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_denied_by_budget() {
        let cache = Arc::new(ClusterCache::new());
        let mut pod = test_pod("default", "guarded", "node-a");
        pod.metadata.labels = Some(
            [("app".to_string(), "guarded".to_string())]
                .into_iter()
                .collect(),
        );
        cache.apply(&ClusterEvent::added(ClusterObject::Pod(Box::new(pod))));

        let mut budget = PodDisruptionBudget::default();
        budget.metadata.name = Some("guarded-pdb".to_string());
        budget.metadata.namespace = Some("default".to_string());
        budget.spec = Some(Default::default());
        budget.spec.as_mut().unwrap().selector =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
                match_labels: Some(
                    [("app".to_string(), "guarded".to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            });
        budget.status = Some(PodDisruptionBudgetStatus {
            disruptions_allowed: 0,
            ..Default::default()
        });
        cache.apply(&ClusterEvent::added(ClusterObject::DisruptionBudget(
            Box::new(budget),
        )));

        let api = Arc::new(ApiClient::new("http://127.0.0.1:1"));
        let executor = MigrationExecutor::new(cache, api, Arc::new(RecentTargets::new()));

        let decision = test_decision("default/guarded");
        let token = CancellationToken::new();
        let err = executor.execute(&decision, &token).await.unwrap_err();
        assert!(matches!(err, RebalancerError::BudgetDenied { .. }));
    }
}
