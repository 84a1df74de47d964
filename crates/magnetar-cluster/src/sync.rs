//! Periodic cache synchronisation against the API server.
//!
//! The host platform's watch streams are the primary feed; this loop is
//! the catch-up path that relists every watched kind, upserts the cache,
//! and emits events so label-driven workers see state they may have missed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use magnetar_core::{ClusterEvent, ClusterObject};

use crate::api::ApiClient;
use crate::cache::ClusterCache;
use crate::error::Result;

/// Configuration for the cache syncer
#[derive(Debug, Clone)]
pub struct CacheSyncerConfig {
    /// Interval between full relists
    pub sync_interval: Duration,
}

impl Default for CacheSyncerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
        }
    }
}

/// Relists the watched kinds on an interval and reconciles the cache
pub struct CacheSyncer {
    api: Arc<ApiClient>,
    cache: Arc<ClusterCache>,
    event_tx: broadcast::Sender<ClusterEvent>,
    config: CacheSyncerConfig,
}

impl CacheSyncer {
    pub fn new(
        api: Arc<ApiClient>,
        cache: Arc<ClusterCache>,
        event_tx: broadcast::Sender<ClusterEvent>,
        config: CacheSyncerConfig,
    ) -> Self {
        Self {
            api,
            cache,
            event_tx,
            config,
        }
    }

    /// Run the sync loop until cancelled. The first sync happens
    /// immediately so dependents start from a populated cache.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!("Starting cache syncer");

        if let Err(e) = self.sync_all().await {
            error!("Initial cache sync failed: {}", e);
        }

        let mut tick = tokio::time::interval(self.config.sync_interval);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Cache syncer shutting down");
                    return Ok(());
                }
                _ = tick.tick() => {
                    if let Err(e) = self.sync_all().await {
                        error!("Cache sync failed: {}", e);
                    }
                }
            }
        }
    }

    /// Relist every watched kind and reconcile the cache with it
    pub async fn sync_all(&self) -> Result<()> {
        debug!("Running full cache sync");

        let nodes = self.api.list_nodes().await?;
        let node_keys: HashSet<String> = nodes
            .iter()
            .filter_map(|n| n.metadata.name.clone())
            .collect();
        for node in nodes {
            self.emit(ClusterEvent::modified(ClusterObject::Node(Box::new(node))));
        }
        for stale in self.cache.nodes() {
            if let Some(name) = stale.metadata.name.clone() {
                if !node_keys.contains(&name) {
                    self.emit(ClusterEvent::deleted(ClusterObject::Node(Box::new(stale))));
                }
            }
        }

        let pods = self.api.list_pods().await?;
        let pod_keys: HashSet<String> = pods.iter().filter_map(magnetar_core::pod_key).collect();
        for pod in pods {
            self.emit(ClusterEvent::modified(ClusterObject::Pod(Box::new(pod))));
        }
        for stale in self.cache.pods() {
            if let Some(key) = magnetar_core::pod_key(&stale) {
                if !pod_keys.contains(&key) {
                    self.emit(ClusterEvent::deleted(ClusterObject::Pod(Box::new(stale))));
                }
            }
        }

        for rs in self.api.list_replica_sets().await? {
            self.emit(ClusterEvent::modified(ClusterObject::ReplicaSet(Box::new(
                rs,
            ))));
        }
        for deploy in self.api.list_deployments().await? {
            self.emit(ClusterEvent::modified(ClusterObject::Deployment(Box::new(
                deploy,
            ))));
        }
        for budget in self.api.list_budgets().await? {
            self.emit(ClusterEvent::modified(ClusterObject::DisruptionBudget(
                Box::new(budget),
            )));
        }

        Ok(())
    }

    /// Apply an event to the cache and publish it to subscribers
    fn emit(&self, event: ClusterEvent) {
        self.cache.apply(&event);
        // No subscribers is fine; the cache is already up to date
        let _ = self.event_tx.send(event);
    }
}
