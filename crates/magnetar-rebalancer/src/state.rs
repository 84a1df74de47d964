//! Label-driven migration state machine.
//!
//! The state lives on the pods themselves, so the worker routes on pod
//! events: `completed` migrations get their metadata stripped, `failed`
//! migrations go through the bounded retry queue. Events may be delivered
//! more than once; every handler is idempotent.

use std::str::FromStr;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use magnetar_cluster::{ApiClient, ClusterCache, ClusterError, WorkQueue};
use magnetar_core::labels::{self, MigrationStatus};
use magnetar_core::{
    pod_key, split_pod_key, usage, ClusterEvent, ClusterObject, RebalancerConfig, Strategy,
    WatchEventType,
};

use crate::error::Result;
use crate::executor::MigrationExecutor;
use crate::strategy::{self, Decision};

/// Failed migrations are retried at most this many times
pub const MAX_MIGRATION_RETRIES: u32 = 5;

const CONFLICT_RETRIES: u32 = 3;
const CONFLICT_BACKOFF: Duration = Duration::from_secs(1);

/// Routes migration-labelled pod events and drives failed-migration retries
pub struct MigrationStateWorker {
    cache: Arc<ClusterCache>,
    api: Arc<ApiClient>,
    executor: Arc<MigrationExecutor>,
    queue: Arc<WorkQueue>,
    event_tx: broadcast::Sender<ClusterEvent>,
    config: RebalancerConfig,
}

impl MigrationStateWorker {
    pub fn new(
        cache: Arc<ClusterCache>,
        api: Arc<ApiClient>,
        executor: Arc<MigrationExecutor>,
        event_tx: broadcast::Sender<ClusterEvent>,
        config: RebalancerConfig,
    ) -> Self {
        Self {
            cache,
            api,
            executor,
            queue: Arc::new(WorkQueue::new(MAX_MIGRATION_RETRIES)),
            event_tx,
            config,
        }
    }

    /// Run until cancelled, consuming pod events and retry work
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!("Starting migration state worker");
        let mut rx = self.event_tx.subscribe();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Migration state worker shutting down");
                    return Ok(());
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => self.handle_event(&event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // The cache is still current; only routing was missed.
                            // The cleanup worker reconciles anything dropped here.
                            warn!("Missed {} events in the state worker", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event bus closed, stopping migration state worker");
                            return Ok(());
                        }
                    }
                }
                key = self.queue.get() => {
                    if let Some(key) = key {
                        self.handle_retry(&key, &token).await;
                    }
                }
            }
        }
    }

    /// Route one pod event by its migration-status label
    async fn handle_event(&self, event: &ClusterEvent) {
        if event.event_type == WatchEventType::Deleted {
            return;
        }
        let ClusterObject::Pod(pod) = &event.object else {
            return;
        };
        if labels::migration_id(pod).is_none() {
            return;
        }
        let Some(key) = pod_key(pod) else { return };

        match labels::migration_status(pod) {
            Some(MigrationStatus::Completed) => {
                let Some((namespace, name)) = split_pod_key(&key) else {
                    return;
                };
                match strip_migration_metadata(&self.api, namespace, name).await {
                    Ok(true) => debug!(pod = %key, "Stripped completed-migration metadata"),
                    Ok(false) => {}
                    Err(e) => warn!(
                        pod = %key,
                        "Could not strip migration metadata; the cleanup worker will retry: {}",
                        e
                    ),
                }
            }
            Some(MigrationStatus::Failed) => {
                debug!(pod = %key, "Queueing failed migration for retry");
                self.queue.add(&key);
            }
            // pending and in-progress advance through the executor
            _ => {}
        }
    }

    /// Re-run a failed migration with a freshly planned target
    async fn handle_retry(&self, key: &str, token: &CancellationToken) {
        let Some((namespace, name)) = split_pod_key(key) else {
            self.queue.done(key);
            return;
        };

        let Some(pod) = self.cache.get_pod(namespace, name) else {
            // Pod is gone; nothing left to retry
            self.queue.done(key);
            self.queue.forget(key);
            return;
        };

        if labels::migration_status(&pod) != Some(MigrationStatus::Failed) {
            // Someone else already moved it along
            self.queue.done(key);
            self.queue.forget(key);
            return;
        }

        let Some(decision) = self.replan(&pod, key) else {
            self.queue.done(key);
            if !self.queue.retry(key) {
                warn!(pod = key, "Abandoning migration: no target after retries");
            }
            return;
        };

        match self.executor.execute(&decision, token).await {
            Ok(()) => {
                self.queue.done(key);
                self.queue.forget(key);
            }
            Err(e) => {
                debug!(pod = key, "Retried migration failed again: {}", e);
                self.queue.done(key);
                if !self.queue.retry(key) {
                    warn!(pod = key, "Abandoning migration after {} retries", MAX_MIGRATION_RETRIES);
                }
            }
        }
    }

    /// Rebuild a decision for a failed migration from the pod's labels and
    /// the current snapshot
    fn replan(&self, pod: &Pod, key: &str) -> Option<Decision> {
        let source_node = pod.spec.as_ref()?.node_name.clone()?;

        let nodes = self.cache.nodes();
        let pods = self.cache.pods();
        let usage_map = usage::snapshot(&nodes, &pods, &self.config);
        let target_node = strategy::select_target(&usage_map, &source_node, &self.config)?;

        let strategy = pod
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::MIGRATION_REASON_LABEL))
            .and_then(|s| Strategy::from_str(s).ok())
            .unwrap_or(Strategy::ResourceOptimization);

        Some(Decision {
            pod_key: key.to_string(),
            source_node,
            target_node,
            strategy,
            reason: "retry of failed migration".to_string(),
        })
    }
}

/// Remove every migration label and annotation from a pod. Returns false
/// when the pod carried none. Idempotent under repeated delivery.
pub fn remove_migration_metadata(pod: &mut Pod) -> bool {
    let mut changed = false;

    if let Some(pod_labels) = pod.metadata.labels.as_mut() {
        for key in labels::migration_label_keys() {
            changed |= pod_labels.remove(key).is_some();
        }
    }
    if let Some(annotations) = pod.metadata.annotations.as_mut() {
        for key in labels::migration_annotation_keys() {
            changed |= annotations.remove(key).is_some();
        }
    }

    changed
}

/// Fetch a pod, strip its migration metadata, and write it back with a
/// bounded conflict retry. Returns false when there was nothing to strip.
pub async fn strip_migration_metadata(
    api: &ApiClient,
    namespace: &str,
    name: &str,
) -> Result<bool> {
    for attempt in 0..CONFLICT_RETRIES {
        let mut pod = match api.get_pod(namespace, name).await {
            Ok(p) => p,
            Err(ClusterError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if !remove_migration_metadata(&mut pod) {
            return Ok(false);
        }

        match api.update_pod(&pod).await {
            Ok(_) => return Ok(true),
            Err(ClusterError::Conflict { .. }) if attempt + 1 < CONFLICT_RETRIES => {
                tokio::time::sleep(CONFLICT_BACKOFF).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(false)
}
