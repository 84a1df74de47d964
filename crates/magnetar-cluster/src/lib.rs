//! Magnetar Cluster - Host-platform interface for the magnetar rebalancer
//!
//! This crate provides:
//! - The in-memory cluster cache fed by watch events
//! - The API client (eviction, pod create/update, workload patches)
//! - A client-side QPS/burst rate limiter
//! - A rate-limited retry work queue

pub mod api;
pub mod cache;
pub mod error;
pub mod ratelimit;
pub mod sync;
pub mod workqueue;

// Re-export commonly used types
pub use api::{ApiClient, EVICTION_GRACE_SECONDS};
pub use cache::{selector_matches, ClusterCache};
pub use error::{ClusterError, Result};
pub use ratelimit::RateLimiter;
pub use sync::{CacheSyncer, CacheSyncerConfig};
pub use workqueue::WorkQueue;
