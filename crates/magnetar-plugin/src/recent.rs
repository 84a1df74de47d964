//! Recent migration targets, used to bias placement scoring away from
//! nodes that just received a migrated pod.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Entries older than this no longer bias scoring
const RECENT_TARGET_TTL: Duration = Duration::from_secs(600);

/// Mutex-guarded map of node name to the last time it was a migration target.
/// Stale entries are swept on each write.
#[derive(Default)]
pub struct RecentTargets {
    inner: Mutex<HashMap<String, Instant>>,
}

impl RecentTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a migration target
    pub fn record(&self, node_name: &str) {
        let mut inner = self.inner.lock();
        inner.retain(|_, at| at.elapsed() < RECENT_TARGET_TTL);
        inner.insert(node_name.to_string(), Instant::now());
    }

    /// True iff the node received a migration within the TTL window
    pub fn is_recent(&self, node_name: &str) -> bool {
        self.inner
            .lock()
            .get(node_name)
            .map(|at| at.elapsed() < RECENT_TARGET_TTL)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
