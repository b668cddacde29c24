//! Background refresh scheduling.
//!
//! `RefreshQueue` spawns cache-refill operations on the Tokio runtime,
//! runs at most one operation per key at a time, and caps how many run
//! against the upstream at once with a semaphore. Callers are never
//! blocked: `enqueue` only inserts into a `DashSet` and spawns.

use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use common::Result;
use dashmap::DashSet;
use futures_util::FutureExt;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

/// Lifetime counters for a refresh queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub accepted: u64,
    pub deduplicated: u64,
    pub completed: u64,
    pub failed: u64,
}

struct QueueState<K>
where
    K: Eq + Hash,
{
    in_flight: DashSet<K>,
    permits: Arc<Semaphore>,
    /// Accepted but still waiting for a permit.
    pending: AtomicUsize,
    idle: Notify,
    accepted: AtomicU64,
    deduplicated: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Deduplicating, bounded-concurrency refresh scheduler. Cheap to clone.
pub struct RefreshQueue<K>
where
    K: Eq + Hash,
{
    state: Arc<QueueState<K>>,
}

impl<K> Clone for RefreshQueue<K>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

/// Removes the key from the in-flight set however the task ends.
struct InFlightGuard<K>
where
    K: Eq + Hash,
{
    state: Arc<QueueState<K>>,
    key: K,
}

impl<K> Drop for InFlightGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.state.in_flight.remove(&self.key);
        self.state.idle.notify_waiters();
    }
}

impl<K> RefreshQueue<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    /// `max_concurrent` must be at least 1; config validation enforces it.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Arc::new(QueueState {
                in_flight: DashSet::new(),
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                accepted: AtomicU64::new(0),
                deduplicated: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule `operation` for `key` unless one is already in flight.
    ///
    /// Returns `false` for a duplicate. Must be called from within a Tokio
    /// runtime. Errors and panics from `operation` are logged and counted.
    pub fn enqueue<F>(&self, key: K, operation: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if !self.state.in_flight.insert(key.clone()) {
            self.state.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!("Refresh for {} already in flight, skipping", key);
            return false;
        }

        self.state.accepted.fetch_add(1, Ordering::Relaxed);
        self.state.pending.fetch_add(1, Ordering::SeqCst);

        let guard = InFlightGuard {
            state: Arc::clone(&self.state),
            key,
        };

        tokio::spawn(async move {
            let state = Arc::clone(&guard.state);
            let permit = Arc::clone(&state.permits).acquire_owned().await;
            state.pending.fetch_sub(1, Ordering::SeqCst);

            let _permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    state.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Refresh for {} dropped, queue closed: {}", guard.key, e);
                    return;
                }
            };

            debug!("Refresh for {} started", guard.key);
            match AssertUnwindSafe(operation).catch_unwind().await {
                Ok(Ok(())) => {
                    state.completed.fetch_add(1, Ordering::Relaxed);
                    info!("Refresh for {} completed", guard.key);
                }
                Ok(Err(e)) => {
                    state.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Refresh for {} failed: {}", guard.key, e);
                }
                Err(_) => {
                    state.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Refresh for {} panicked", guard.key);
                }
            }
        });

        true
    }

    /// Operations accepted but not yet holding a permit.
    pub fn queue_depth(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.state.in_flight.contains(key)
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.in_flight.len()
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            accepted: self.state.accepted.load(Ordering::Relaxed),
            deduplicated: self.state.deduplicated.load(Ordering::Relaxed),
            completed: self.state.completed.load(Ordering::Relaxed),
            failed: self.state.failed.load(Ordering::Relaxed),
        }
    }

    /// Resolve once no operation is in flight.
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a wakeup between the two is not lost.
            let notified = self.state.idle.notified();
            if self.state.in_flight.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Error;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn exploding_refresh() -> Result<()> {
        panic!("upstream client exploded")
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_key_runs_once() {
        let queue = RefreshQueue::new(4);
        let runs = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let counter = Arc::clone(&runs);
        assert!(queue.enqueue("north", async move {
            let _ = release_rx.await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let counter = Arc::clone(&runs);
        assert!(!queue.enqueue("north", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        assert!(queue.is_in_flight(&"north"));

        let _ = release_tx.send(());
        queue.wait_idle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!queue.is_in_flight(&"north"));
        let stats = queue.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.deduplicated, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_releases_key() {
        let queue = RefreshQueue::new(1);
        assert!(queue.enqueue("north", async {
            Err(Error::UpstreamTransport("connection refused".into()))
        }));
        queue.wait_idle().await;

        assert!(!queue.is_in_flight(&"north"));
        assert_eq!(queue.stats().failed, 1);
        assert!(queue.enqueue("north", async { Ok(()) }));
        queue.wait_idle().await;
        assert_eq!(queue.stats().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_releases_key() {
        let queue = RefreshQueue::new(1);
        assert!(queue.enqueue("north", exploding_refresh()));
        queue.wait_idle().await;

        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.stats().failed, 1);
        assert!(queue.enqueue("north", async { Ok(()) }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let queue = RefreshQueue::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for site in ["a", "b", "c", "d", "e"] {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            assert!(queue.enqueue(site, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        queue.wait_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(queue.stats().completed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_depth_counts_waiting_operations() {
        let queue = RefreshQueue::new(1);
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        queue.enqueue("a", async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok(())
        });
        queue.enqueue("b", async { Ok(()) });
        queue.enqueue("c", async { Ok(()) });
        assert_eq!(queue.queue_depth(), 3);

        started_rx.await.expect("first refresh should start");
        assert_eq!(queue.queue_depth(), 2);
        assert_eq!(queue.in_flight_len(), 3);

        let _ = release_tx.send(());
        queue.wait_idle().await;
        assert_eq!(queue.queue_depth(), 0);
        assert_eq!(queue.stats().completed, 3);
    }
}
