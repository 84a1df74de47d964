//! Reservation ledger: in-flight placements between Reserve and bind.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use magnetar_core::ResourceQuantities;

/// A tentative resource commitment recorded for a pod between Reserve and bind
#[derive(Debug, Clone)]
pub struct Reservation {
    pub pod_key: String,
    pub node_name: String,
    pub requests: ResourceQuantities,
    pub created_at: Instant,
}

/// Thread-safe mapping of in-flight reservations. At most one record exists
/// per pod key.
#[derive(Default)]
pub struct ReservationLedger {
    inner: Mutex<HashMap<String, Reservation>>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the reservation for a pod
    pub fn reserve(&self, pod_key: &str, node_name: &str, requests: ResourceQuantities) {
        let mut inner = self.inner.lock();
        inner.insert(
            pod_key.to_string(),
            Reservation {
                pod_key: pod_key.to_string(),
                node_name: node_name.to_string(),
                requests,
                created_at: Instant::now(),
            },
        );
    }

    /// Remove the reservation for a pod, if present. Idempotent.
    pub fn unreserve(&self, pod_key: &str) -> Option<Reservation> {
        self.inner.lock().remove(pod_key)
    }

    /// Sum of reserved resources on a node
    pub fn node_total(&self, node_name: &str) -> ResourceQuantities {
        let inner = self.inner.lock();
        let mut total = ResourceQuantities::default();
        for reservation in inner.values() {
            if reservation.node_name == node_name {
                total = total.add(&reservation.requests);
            }
        }
        total
    }

    /// Remove entries older than the TTL. Returns the number removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, r| r.created_at.elapsed() < ttl);
        let removed = before - inner.len();
        if removed > 0 {
            debug!(removed, "Swept expired reservations");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_unreserve_round_trip() {
        let ledger = ReservationLedger::new();
        assert!(ledger.is_empty());

        ledger.reserve("default/a", "node1", ResourceQuantities::new(500, 1024));
        assert_eq!(ledger.len(), 1);

        let reservation = ledger.unreserve("default/a").unwrap();
        assert_eq!(reservation.node_name, "node1");
        assert!(ledger.is_empty());

        // Idempotent
        assert!(ledger.unreserve("default/a").is_none());
    }

    #[test]
    fn test_reserve_replaces() {
        let ledger = ReservationLedger::new();
        ledger.reserve("default/a", "node1", ResourceQuantities::new(500, 1024));
        ledger.reserve("default/a", "node2", ResourceQuantities::new(250, 512));

        assert_eq!(ledger.len(), 1);
        assert!(ledger.node_total("node1").is_zero());
        assert_eq!(ledger.node_total("node2").cpu_millicores, 250);
    }

    #[test]
    fn test_node_total_sums() {
        let ledger = ReservationLedger::new();
        ledger.reserve("default/a", "node1", ResourceQuantities::new(500, 1024));
        ledger.reserve("default/b", "node1", ResourceQuantities::new(250, 512));
        ledger.reserve("default/c", "node2", ResourceQuantities::new(100, 256));

        let total = ledger.node_total("node1");
        assert_eq!(total.cpu_millicores, 750);
        assert_eq!(total.memory_bytes, 1536);
    }

    #[test]
    fn test_sweep() {
        let ledger = ReservationLedger::new();
        ledger.reserve("default/a", "node1", ResourceQuantities::new(500, 1024));

        // Entry is fresh; a generous TTL keeps it
        assert_eq!(ledger.sweep(Duration::from_secs(60)), 0);
        assert_eq!(ledger.len(), 1);

        // Zero TTL expires everything
        assert_eq!(ledger.sweep(Duration::ZERO), 1);
        assert!(ledger.is_empty());
    }
}
