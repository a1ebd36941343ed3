//! Per-key fetch deduplication.
//!
//! The coordinator owns, per cache key, at most one in-flight fetch job.
//! Callers that request a key while a job is pending join the same shared
//! future instead of invoking the job again; every waiter observes the same
//! settled value or the same error. Records live only in process memory and
//! are dropped the moment the job settles.
//!
//! Retry policy deliberately lives with callers: a rejection is propagated
//! verbatim to every current waiter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use super::error::CacheError;

/// Serialized payload bytes plus the durable-write timestamp, as produced
/// by one settled fetch job and delivered to every waiter.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub payload: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

type InFlight = Shared<BoxFuture<'static, Result<FetchedPayload, Arc<CacheError>>>>;

#[derive(Default)]
pub struct FetchCoordinator {
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` for `key`, or join the job already running for it.
    ///
    /// `job` is invoked at most once per overlapping burst of callers; it is
    /// only called to construct the future (while the registry lock is
    /// held), the work itself starts on first poll.
    pub async fn fetch<F>(&self, key: &str, job: F) -> Result<FetchedPayload, Arc<CacheError>>
    where
        F: FnOnce() -> BoxFuture<'static, Result<FetchedPayload, CacheError>>,
    {
        let fut = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(existing) = in_flight.get(key) {
                debug!(key = key, "Joining in-flight fetch");
                existing.clone()
            } else {
                let fut: InFlight = job().map(|res| res.map_err(Arc::new)).boxed().shared();
                in_flight.insert(key.to_string(), fut.clone());
                fut
            }
        };

        let result = fut.clone().await;

        // Drop the record now that the job has settled. The identity check
        // keeps a late waiter from evicting a newer record under the same key.
        let mut in_flight = self.in_flight.lock().unwrap();
        if in_flight.get(key).map_or(false, |current| current.ptr_eq(&fut)) {
            in_flight.remove(key);
        }
        drop(in_flight);

        result
    }

    /// Number of fetches currently in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn gated_job(
        calls: Arc<AtomicUsize>,
        gate: Arc<Notify>,
        payload: &'static [u8],
    ) -> impl FnOnce() -> BoxFuture<'static, Result<FetchedPayload, CacheError>> {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                gate.notified().await;
                Ok(FetchedPayload {
                    payload: payload.to_vec(),
                    stored_at: Utc::now(),
                })
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_job() {
        let coordinator = Arc::new(FetchCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                coordinator
                    .fetch("forum:9:newest", gated_job(calls, gate, b"posts"))
                    .await
            }));
        }

        // Let every caller reach the registry before the job settles
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.in_flight_count(), 1);
        gate.notify_one();

        for handle in handles {
            let fetched = handle.await.unwrap().unwrap();
            assert_eq!(fetched.payload, b"posts".to_vec());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_propagates_to_every_waiter() {
        let coordinator = Arc::new(FetchCoordinator::new());
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..3 {
            let coordinator = Arc::clone(&coordinator);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                coordinator
                    .fetch("k", move || {
                        async move {
                            gate.notified().await;
                            Err(CacheError::FetchFailed(anyhow::anyhow!("backend down")))
                        }
                        .boxed()
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_one();

        let mut errors = Vec::new();
        for handle in handles {
            errors.push(handle.await.unwrap().unwrap_err());
        }
        // All waiters hold the same settled error
        assert!(errors.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert!(errors[0].to_string().contains("backend down"));
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_independently() {
        let coordinator = FetchCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            let calls = Arc::clone(&calls);
            coordinator
                .fetch(key, move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        Ok(FetchedPayload {
                            payload: b"x".to_vec(),
                            stored_at: Utc::now(),
                        })
                    }
                    .boxed()
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_settled_record_does_not_dedup_later_bursts() {
        let coordinator = FetchCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            coordinator
                .fetch("k", move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        Ok(FetchedPayload {
                            payload: b"x".to_vec(),
                            stored_at: Utc::now(),
                        })
                    }
                    .boxed()
                })
                .await
                .unwrap();
        }

        // Sequential bursts each run their own job
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
