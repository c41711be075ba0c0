use crate::metrics::FETCHES_IN_FLIGHT;
use dashmap::{mapref::entry::Entry, DashMap};
use sna_gateway_core::{ProjectKey, ResourceKind};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

pub type FetchKey = (ProjectKey, ResourceKind);

struct RegisteredFetch {
    id: u64,
    handle: AbortHandle,
}

/// Bounded pool of background fetches with a registry of in-flight handles.
///
/// A fetch waits for one of `max_concurrent` permits before it runs; the
/// optional deadline only covers the running phase.
pub struct FetchPool {
    permits: Arc<Semaphore>,
    in_flight: Arc<DashMap<FetchKey, RegisteredFetch>>,
    timeout: Option<Duration>,
    next_id: AtomicU64,
}

impl FetchPool {
    pub fn new(max_concurrent: usize, timeout: Option<Duration>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(DashMap::new()),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Runs `task` in the background. `on_timeout` runs instead of the rest
    /// of `task` when the deadline expires.
    ///
    /// Returns `false` without spawning when a fetch is already registered
    /// for the pair; the registered fetch keeps running.
    pub fn spawn<F, T>(
        &self,
        key: ProjectKey,
        resource: ResourceKind,
        task: F,
        on_timeout: T,
    ) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        let slot = match self.in_flight.entry((key, resource)) {
            Entry::Occupied(existing) => {
                debug!(project = %existing.key().0, resource = %resource, "Fetch already registered, not spawning");
                return false;
            }
            Entry::Vacant(slot) => slot,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let permits = self.permits.clone();
        let in_flight = self.in_flight.clone();
        let timeout = self.timeout;
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let task_key: FetchKey = slot.key().clone();
        let handle = tokio::spawn(async move {
            // the entry must exist before this task can remove it
            let _ = registered_rx.await;
            match permits.acquire_owned().await {
                Ok(_permit) => match timeout {
                    Some(deadline) => {
                        if tokio::time::timeout(deadline, task).await.is_err() {
                            warn!(
                                project = %task_key.0,
                                resource = %task_key.1,
                                timeout_secs = deadline.as_secs(),
                                "Background fetch timed out"
                            );
                            on_timeout();
                        }
                    }
                    None => task.await,
                },
                Err(_) => debug!(project = %task_key.0, "Fetch pool closed, dropping fetch"),
            }
            if in_flight
                .remove_if(&task_key, |_, fetch| fetch.id == id)
                .is_some()
            {
                FETCHES_IN_FLIGHT.dec();
            }
        });

        // the shard lock is released before the task may run its removal
        drop(slot.insert(RegisteredFetch {
            id,
            handle: handle.abort_handle(),
        }));
        FETCHES_IN_FLIGHT.inc();
        let _ = registered_tx.send(());
        true
    }

    /// Aborts the fetch for this pair. Returns whether one was registered.
    pub fn cancel(&self, key: &ProjectKey, resource: ResourceKind) -> bool {
        match self.in_flight.remove(&(key.clone(), resource)) {
            Some((_, fetch)) => {
                fetch.handle.abort();
                FETCHES_IN_FLIGHT.dec();
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self, key: &ProjectKey, resource: ResourceKind) -> bool {
        self.in_flight.contains_key(&(key.clone(), resource))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Rejects queued fetches and aborts every registered one.
    pub fn shutdown(&self) {
        self.permits.close();
        let keys: Vec<FetchKey> = self.in_flight.iter().map(|e| e.key().clone()).collect();
        for (key, resource) in keys {
            self.cancel(&key, resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn key(repo: &str) -> ProjectKey {
        ProjectKey::new("acme", repo).unwrap()
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn finished_fetch_leaves_registry() {
        let pool = FetchPool::new(4, None);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_task = ran.clone();

        pool.spawn(
            key("widget"),
            ResourceKind::ArtifactMetrics,
            async move {
                ran_task.fetch_add(1, Ordering::SeqCst);
            },
            || {},
        );

        wait_until(|| pool.in_flight() == 0).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_runs_timeout_hook() {
        let pool = FetchPool::new(4, Some(Duration::from_millis(20)));
        let timed_out = Arc::new(AtomicUsize::new(0));
        let hook = timed_out.clone();

        pool.spawn(
            key("slow"),
            ResourceKind::ProjectMetrics,
            std::future::pending::<()>(),
            move || {
                hook.fetch_add(1, Ordering::SeqCst);
            },
        );

        wait_until(|| timed_out.load(Ordering::SeqCst) == 1).await;
        wait_until(|| pool.in_flight() == 0).await;
    }

    #[tokio::test]
    async fn permits_bound_running_fetches() {
        let pool = FetchPool::new(1, None);
        let release = Arc::new(Notify::new());
        let started = Arc::new(AtomicUsize::new(0));

        for repo in ["a", "b"] {
            let release = release.clone();
            let started = started.clone();
            pool.spawn(
                key(repo),
                ResourceKind::ArtifactMetrics,
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                },
                || {},
            );
        }

        wait_until(|| started.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(pool.in_flight(), 2);

        release.notify_one();
        wait_until(|| started.load(Ordering::SeqCst) == 2).await;
        release.notify_one();
        wait_until(|| pool.in_flight() == 0).await;
    }

    #[tokio::test]
    async fn second_spawn_for_pair_is_refused() {
        let pool = FetchPool::new(4, None);
        let release = Arc::new(Notify::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let first_release = release.clone();
        let first_ran = ran.clone();
        assert!(pool.spawn(
            key("widget"),
            ResourceKind::ProjectMetrics,
            async move {
                first_release.notified().await;
                first_ran.fetch_add(1, Ordering::SeqCst);
            },
            || {},
        ));

        let second_ran = ran.clone();
        assert!(!pool.spawn(
            key("widget"),
            ResourceKind::ProjectMetrics,
            async move {
                second_ran.fetch_add(10, Ordering::SeqCst);
            },
            || {},
        ));
        assert_eq!(pool.in_flight(), 1);

        release.notify_one();
        wait_until(|| pool.in_flight() == 0).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_and_shutdown_abort_fetches() {
        let pool = FetchPool::new(4, None);
        for repo in ["a", "b", "c"] {
            pool.spawn(
                key(repo),
                ResourceKind::ProjectMetrics,
                std::future::pending::<()>(),
                || {},
            );
        }
        assert!(pool.is_in_flight(&key("a"), ResourceKind::ProjectMetrics));
        assert!(pool.cancel(&key("a"), ResourceKind::ProjectMetrics));
        assert!(!pool.cancel(&key("a"), ResourceKind::ProjectMetrics));
        assert_eq!(pool.in_flight(), 2);

        pool.shutdown();
        assert_eq!(pool.in_flight(), 0);
    }
}
