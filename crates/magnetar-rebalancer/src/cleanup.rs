//! Periodic reconciliation of transient migration resources: expired
//! steering preferences, temporary disruption budgets, and completed
//! migration metadata the event path missed.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use magnetar_cluster::{ApiClient, ClusterCache};
use magnetar_core::labels::{self, MigrationStatus};
use magnetar_core::pod_key;

use crate::error::Result;
use crate::state::strip_migration_metadata;
use crate::steering;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Background worker reconciling migration leftovers. Errors are logged
/// and reattempted on the next cycle.
pub struct CleanupWorker {
    cache: Arc<ClusterCache>,
    api: Arc<ApiClient>,
}

impl CleanupWorker {
    pub fn new(cache: Arc<ClusterCache>, api: Arc<ApiClient>) -> Self {
        Self { cache, api }
    }

    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!("Starting migration cleanup worker");
        let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Cleanup worker shutting down");
                    return Ok(());
                }
                _ = tick.tick() => {
                    self.cycle().await;
                }
            }
        }
    }

    async fn cycle(&self) {
        let now = Utc::now();

        for deploy in self.cache.steered_deployments() {
            if !steering::steering_expired(&deploy, now) {
                continue;
            }
            let namespace = deploy.metadata.namespace.as_deref().unwrap_or("default");
            let Some(name) = deploy.metadata.name.as_deref() else {
                continue;
            };
            match steering::remove_steering_from(&self.api, namespace, name).await {
                Ok(true) => debug!(
                    deployment = format!("{}/{}", namespace, name).as_str(),
                    "Removed expired steering preferences"
                ),
                Ok(false) => {}
                Err(e) => warn!(
                    deployment = format!("{}/{}", namespace, name).as_str(),
                    "Steering cleanup failed, will retry next cycle: {}", e
                ),
            }
        }

        for budget in self.cache.rescheduler_budgets() {
            if !steering::budget_expired(&budget, now) {
                continue;
            }
            let namespace = budget.metadata.namespace.as_deref().unwrap_or("default");
            let Some(name) = budget.metadata.name.as_deref() else {
                continue;
            };
            match self.api.delete_budget(namespace, name).await {
                Ok(()) => debug!(
                    budget = format!("{}/{}", namespace, name).as_str(),
                    "Deleted expired temporary disruption budget"
                ),
                Err(e) => warn!(
                    budget = format!("{}/{}", namespace, name).as_str(),
                    "Budget cleanup failed, will retry next cycle: {}", e
                ),
            }
        }

        for pod in self.cache.pods() {
            if labels::migration_status(&pod) != Some(MigrationStatus::Completed) {
                continue;
            }
            let Some(key) = pod_key(&pod) else { continue };
            let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            match strip_migration_metadata(&self.api, namespace, name).await {
                Ok(true) => debug!(pod = %key, "Stripped stale completed-migration metadata"),
                Ok(false) => {}
                Err(e) => warn!(
                    pod = %key,
                    "Metadata cleanup failed, will retry next cycle: {}", e
                ),
            }
        }
    }
}
