//! HTTP client for the host platform's API server.
//!
//! All pod removals go through the eviction subresource; direct pod DELETE
//! is deliberately not exposed. Every call passes through the client-side
//! QPS/burst limiter.

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::{Eviction, PodDisruptionBudget};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{DeleteOptions, ObjectMeta};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ClusterError, Result};
use crate::ratelimit::RateLimiter;

/// Default grace period passed to the eviction endpoint, in seconds
pub const EVICTION_GRACE_SECONDS: i64 = 30;

/// API client with a client-side QPS bound
pub struct ApiClient {
    base_url: String,
    client: Client,
    limiter: RateLimiter,
}

/// Kubernetes list response envelope
#[derive(serde::Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

impl ApiClient {
    /// Production QPS profile (50 QPS / 100 burst)
    pub fn new(base_url: &str) -> Self {
        Self::with_limits(base_url, 50, 100)
    }

    /// Development QPS profile (100 QPS / 200 burst)
    pub fn dev(base_url: &str) -> Self {
        Self::with_limits(base_url, 100, 200)
    }

    pub fn with_limits(base_url: &str, qps: u32, burst: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            limiter: RateLimiter::new(qps, burst),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.limiter.acquire().await;
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClusterError::api_error(format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClusterError::not_found(path.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClusterError::api_error(format!(
                "GET {} failed with status {}: {}",
                path, status, body
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| ClusterError::api_error(format!("Failed to parse response: {}", e)))
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.limiter.acquire().await;
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let resp = self
            .client
            .request(method.clone(), &url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClusterError::api_error(format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        if status == StatusCode::CONFLICT {
            return Err(ClusterError::conflict(path.to_string()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClusterError::not_found(path.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClusterError::api_error(format!(
                "{} {} failed with status {}: {}",
                method, path, status, body
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| ClusterError::api_error(format!("Failed to parse response: {}", e)))
    }

    /// GET /api/v1/namespaces/{namespace}/pods/{name}
    pub async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.get_json(&format!("/api/v1/namespaces/{}/pods/{}", namespace, name))
            .await
    }

    /// POST /api/v1/namespaces/{namespace}/pods
    pub async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        self.send_json(
            reqwest::Method::POST,
            &format!("/api/v1/namespaces/{}/pods", namespace),
            pod,
        )
        .await
    }

    /// PUT /api/v1/namespaces/{namespace}/pods/{name}
    ///
    /// A 409 from the server surfaces as `ClusterError::Conflict` so callers
    /// can drive optimistic-concurrency retries.
    pub async fn update_pod(&self, pod: &Pod) -> Result<Pod> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClusterError::internal_error("Pod has no name"))?;
        self.send_json(
            reqwest::Method::PUT,
            &format!("/api/v1/namespaces/{}/pods/{}", namespace, name),
            pod,
        )
        .await
    }

    /// POST /api/v1/namespaces/{namespace}/pods/{name}/eviction
    ///
    /// A 429 (disruption budget exhausted) surfaces as `EvictionDenied`.
    pub async fn evict_pod(&self, namespace: &str, name: &str, grace_seconds: i64) -> Result<()> {
        self.limiter.acquire().await;
        let pod_key = format!("{}/{}", namespace, name);
        let url = format!(
            "{}/api/v1/namespaces/{}/pods/{}/eviction",
            self.base_url, namespace, name
        );

        let eviction = Eviction {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            delete_options: Some(DeleteOptions {
                grace_period_seconds: Some(grace_seconds),
                ..Default::default()
            }),
        };

        info!(pod = %pod_key, grace_seconds, "Evicting pod");

        let resp = self
            .client
            .post(&url)
            .json(&eviction)
            .send()
            .await
            .map_err(|e| ClusterError::api_error(format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClusterError::eviction_denied(pod_key, body));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClusterError::not_found(pod_key));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClusterError::api_error(format!(
                "Eviction of {} failed with status {}: {}",
                pod_key, status, body
            )));
        }

        Ok(())
    }

    /// GET /apis/apps/v1/namespaces/{namespace}/deployments/{name}
    pub async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.get_json(&format!(
            "/apis/apps/v1/namespaces/{}/deployments/{}",
            namespace, name
        ))
        .await
    }

    /// PUT /apis/apps/v1/namespaces/{namespace}/deployments/{name}
    pub async fn update_deployment(&self, deploy: &Deployment) -> Result<Deployment> {
        let namespace = deploy.metadata.namespace.as_deref().unwrap_or("default");
        let name = deploy
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClusterError::internal_error("Deployment has no name"))?;
        self.send_json(
            reqwest::Method::PUT,
            &format!(
                "/apis/apps/v1/namespaces/{}/deployments/{}",
                namespace, name
            ),
            deploy,
        )
        .await
    }

    /// POST /apis/policy/v1/namespaces/{namespace}/poddisruptionbudgets
    pub async fn create_budget(&self, budget: &PodDisruptionBudget) -> Result<PodDisruptionBudget> {
        let namespace = budget.metadata.namespace.as_deref().unwrap_or("default");
        self.send_json(
            reqwest::Method::POST,
            &format!("/apis/policy/v1/namespaces/{}/poddisruptionbudgets", namespace),
            budget,
        )
        .await
    }

    /// DELETE /apis/policy/v1/namespaces/{namespace}/poddisruptionbudgets/{name}
    pub async fn delete_budget(&self, namespace: &str, name: &str) -> Result<()> {
        self.limiter.acquire().await;
        let url = format!(
            "{}/apis/policy/v1/namespaces/{}/poddisruptionbudgets/{}",
            self.base_url, namespace, name
        );
        debug!("DELETE {}", url);

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ClusterError::api_error(format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        // Already gone is fine for cleanup
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClusterError::api_error(format!(
                "DELETE budget {}/{} failed with status {}: {}",
                namespace, name, status, body
            )));
        }

        Ok(())
    }

    /// GET /api/v1/pods
    pub async fn list_pods(&self) -> Result<Vec<Pod>> {
        Ok(self.get_json::<List<Pod>>("/api/v1/pods").await?.items)
    }

    /// GET /api/v1/nodes
    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.get_json::<List<Node>>("/api/v1/nodes").await?.items)
    }

    /// GET /apis/apps/v1/replicasets
    pub async fn list_replica_sets(&self) -> Result<Vec<ReplicaSet>> {
        Ok(self
            .get_json::<List<ReplicaSet>>("/apis/apps/v1/replicasets")
            .await?
            .items)
    }

    /// GET /apis/apps/v1/deployments
    pub async fn list_deployments(&self) -> Result<Vec<Deployment>> {
        Ok(self
            .get_json::<List<Deployment>>("/apis/apps/v1/deployments")
            .await?
            .items)
    }

    /// GET /apis/policy/v1/poddisruptionbudgets
    pub async fn list_budgets(&self) -> Result<Vec<PodDisruptionBudget>> {
        Ok(self
            .get_json::<List<PodDisruptionBudget>>("/apis/policy/v1/poddisruptionbudgets")
            .await?
            .items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let client = ApiClient::new("http://127.0.0.1:6443/");
        assert_eq!(client.base_url(), "http://127.0.0.1:6443");
    }

    #[test]
    fn test_list_envelope_parses() {
        let body = r#"{"kind": "PodList", "items": [{"metadata": {"name": "a"}}]}"#;
        let list: List<Pod> = serde_json::from_str(body).unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].metadata.name.as_deref(), Some("a"));

        let empty: List<Pod> = serde_json::from_str(r#"{"kind": "PodList"}"#).unwrap();
        assert!(empty.items.is_empty());
    }
}
