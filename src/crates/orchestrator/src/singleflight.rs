//! Per-key single-flight execution.
//!
//! Exactly one computation runs per key at a time; concurrent callers for
//! the same key join the in-flight result instead of starting a second
//! computation. The map stores *weak* handles to the shared future: when
//! every joined caller detaches (drops its wait), the computation itself
//! is dropped - cancellation propagates to the producer - while any caller
//! still waiting keeps it alive.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::future::Future;

use crate::{OrchestratorError, Result};

type FlightFuture<T> = BoxFuture<'static, Result<Arc<T>>>;

/// Single-flight join map keyed by string (fingerprints, here).
pub struct SingleFlight<T> {
    inflight: Arc<DashMap<String, WeakShared<FlightFuture<T>>>>,
}

impl<T: Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Join the in-flight computation for `key`, or start one with `make`.
    ///
    /// `make` is only invoked when no live computation exists for the key.
    /// The result (or error) is shared with every joined caller.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = self.obtain(key, make);
        shared.await
    }

    /// Number of computations currently in flight (live handles only).
    pub fn in_flight(&self) -> usize {
        self.inflight
            .iter()
            .filter(|e| e.value().upgrade().is_some())
            .count()
    }

    fn obtain<F, Fut>(&self, key: &str, make: F) -> Shared<FlightFuture<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        use dashmap::mapref::entry::Entry;

        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                // Join the live flight if one exists; a dead weak handle
                // (all callers detached, or completed) is replaced.
                if let Some(live) = occupied.get().upgrade() {
                    return live;
                }
                let shared = self.launch(key, make);
                occupied.insert(shared.downgrade().expect("freshly created shared future"));
                shared
            }
            Entry::Vacant(vacant) => {
                let shared = self.launch(key, make);
                vacant.insert(shared.downgrade().expect("freshly created shared future"));
                shared
            }
        }
    }

    fn launch<F, Fut>(&self, key: &str, make: F) -> Shared<FlightFuture<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let fut = make();
        let inflight = Arc::clone(&self.inflight);
        let key = key.to_string();
        let wrapped: FlightFuture<T> = async move {
            let result = fut.await.map(Arc::new);
            inflight.remove(&key);
            result
        }
        .boxed();
        wrapped.shared()
    }
}

impl<T: Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let flights: Arc<SingleFlight<u64>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = Arc::clone(&flights);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                flights
                    .run("key", move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42u64)
                    })
                    .await
            }));
        }
        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(*value, 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flights: SingleFlight<String> = SingleFlight::new();
        let a = flights
            .run("a", || async { Ok("alpha".to_string()) })
            .await
            .unwrap();
        let b = flights
            .run("b", || async { Ok("beta".to_string()) })
            .await
            .unwrap();
        assert_eq!(*a, "alpha");
        assert_eq!(*b, "beta");
    }

    #[tokio::test]
    async fn test_errors_are_shared_with_joined_callers() {
        let flights: Arc<SingleFlight<u64>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let flights = Arc::clone(&flights);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                flights
                    .run("key", move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(OrchestratorError::Catalog("down".into()))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completed_flight_allows_a_new_one() {
        let flights: SingleFlight<u64> = SingleFlight::new();
        let first = flights.run("key", || async { Ok(1u64) }).await.unwrap();
        let second = flights.run("key", || async { Ok(2u64) }).await.unwrap();
        assert_eq!(*first, 1);
        assert_eq!(*second, 2);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_detaching_every_caller_cancels_the_computation() {
        let flights: Arc<SingleFlight<u64>> = Arc::new(SingleFlight::new());
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let flights = Arc::clone(&flights);
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            tokio::spawn(async move {
                let _ = flights
                    .run("key", move || async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(7u64)
                    })
                    .await;
            })
        };

        // Let the computation start, then detach the only caller.
        tokio::time::sleep(Duration::from_millis(50)).await;
        waiter.abort();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(
            finished.load(Ordering::SeqCst),
            0,
            "dropped last caller should cancel the shared computation"
        );
    }
}
