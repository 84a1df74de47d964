//! Rate-limited retry queue of pod keys.
//!
//! Workers pull keys with `get`, must call `done` after processing, and
//! re-enqueue failures with `retry`, which applies exponential back-off up
//! to `max_retries` before the item is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);

struct QueueState {
    /// Keys currently enqueued (deduplicates adds)
    queued: HashSet<String>,
    /// Keys handed to a worker and not yet done
    processing: HashSet<String>,
    /// Retry counts per key
    attempts: HashMap<String, u32>,
}

/// Work queue of pod keys with per-item retry accounting
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    state: Arc<Mutex<QueueState>>,
    max_retries: u32,
}

impl WorkQueue {
    pub fn new(max_retries: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            state: Arc::new(Mutex::new(QueueState {
                queued: HashSet::new(),
                processing: HashSet::new(),
                attempts: HashMap::new(),
            })),
            max_retries,
        }
    }

    /// Enqueue a key. Duplicates of an already-queued key are dropped.
    pub fn add(&self, key: &str) {
        {
            let mut state = self.state.lock();
            if state.queued.contains(key) {
                return;
            }
            state.queued.insert(key.to_string());
        }
        // Receiver lives as long as the queue
        let _ = self.tx.send(key.to_string());
    }

    /// Pull the next key, waiting until one is available. Returns None when
    /// the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        let key = self.rx.lock().await.recv().await?;
        let mut state = self.state.lock();
        state.queued.remove(&key);
        state.processing.insert(key.clone());
        Some(key)
    }

    /// Mark a key as processed. Must be called after every `get`.
    pub fn done(&self, key: &str) {
        self.state.lock().processing.remove(key);
    }

    /// Re-enqueue a failed key with exponential back-off. Returns false when
    /// the key exhausted its retries and was dropped.
    pub fn retry(&self, key: &str) -> bool {
        let attempt = {
            let mut state = self.state.lock();
            let attempt = state.attempts.entry(key.to_string()).or_insert(0);
            *attempt += 1;
            *attempt
        };

        if attempt > self.max_retries {
            warn!(key, attempt, "Dropping item after exhausting retries");
            self.forget(key);
            return false;
        }

        let delay = backoff_delay(attempt);
        debug!(key, attempt, ?delay, "Re-enqueueing with back-off");

        let tx = self.tx.clone();
        let state = Arc::clone(&self.state);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = state.lock();
                if state.queued.contains(&key) {
                    return;
                }
                state.queued.insert(key.clone());
            }
            let _ = tx.send(key);
        });
        true
    }

    /// Reset the retry counter for a key that finally succeeded
    pub fn forget(&self, key: &str) {
        self.state.lock().attempts.remove(key);
    }

    /// Number of keys currently enqueued
    pub fn len(&self) -> usize {
        self.state.lock().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    (BASE_DELAY * 2u32.pow(exp)).min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(7), Duration::from_secs(60));
        assert_eq!(backoff_delay(30), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_add_get_done() {
        let queue = WorkQueue::new(5);
        queue.add("default/a");
        queue.add("default/a"); // deduplicated
        queue.add("default/b");
        assert_eq!(queue.len(), 2);

        let first = queue.get().await.unwrap();
        assert_eq!(first, "default/a");
        queue.done(&first);

        let second = queue.get().await.unwrap();
        assert_eq!(second, "default/b");
        queue.done(&second);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_and_exhaustion() {
        let queue = WorkQueue::new(2);
        queue.add("default/a");
        let key = queue.get().await.unwrap();
        queue.done(&key);

        // First retry comes back after the base delay
        assert!(queue.retry(&key));
        tokio::time::advance(Duration::from_millis(1100)).await;
        let key = queue.get().await.unwrap();
        queue.done(&key);

        // Second retry still within budget
        assert!(queue.retry(&key));
        tokio::time::advance(Duration::from_millis(2100)).await;
        let key = queue.get().await.unwrap();
        queue.done(&key);

        // Third failure exhausts max_retries = 2
        assert!(!queue.retry(&key));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_forget_resets_attempts() {
        let queue = WorkQueue::new(1);
        queue.add("default/a");
        let key = queue.get().await.unwrap();
        queue.done(&key);

        assert!(queue.retry(&key));
        queue.forget(&key);
        // Counter was reset, so another retry is allowed
        assert!(queue.retry(&key));
    }
}
