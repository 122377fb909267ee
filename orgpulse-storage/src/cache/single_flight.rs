//! Single-flight execution of source fetches.
//!
//! At most one fetch runs per [`CacheKey`]. Callers arriving while a fetch is
//! in progress attach to it and receive the same result, success or failure.
//!
//! The fetch itself runs on a spawned task, so a caller that is dropped while
//! waiting only detaches: the fetch keeps going and still completes for the
//! remaining waiters. Every fetch runs under a deadline; when it elapses the
//! slot resolves as [`FetchError::DeadlineExceeded`] and is freed.
//!
//! Slots live in a sharded [`DashMap`]. A shard lock is held only while a
//! slot is looked up or inserted, never across an await, so fetches for
//! unrelated keys never serialize behind each other.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use orgpulse_core::FetchError;
use tracing::debug;

use super::cache_key::CacheKey;

type SharedFlight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Slot<T, E> {
    id: u64,
    flight: SharedFlight<T, E>,
}

/// Frees a slot when its fetch task finishes or unwinds.
struct SlotGuard<T, E> {
    slots: Arc<DashMap<CacheKey, Slot<T, E>>>,
    key: CacheKey,
    id: u64,
}

impl<T, E> Drop for SlotGuard<T, E> {
    fn drop(&mut self) {
        // Only remove our own slot, a newer flight may already own the key.
        self.slots.remove_if(&self.key, |_, slot| slot.id == self.id);
    }
}

/// Counters describing single-flight activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FlightStats {
    /// Executions started.
    pub started: u64,
    /// Callers that attached to an execution already in progress.
    pub joined: u64,
    /// Executions that hit their deadline.
    pub timed_out: u64,
}

/// Coordinator collapsing concurrent fetches per key into one execution.
///
/// `E` must be constructible from [`FetchError`] so deadline and task
/// failures can be reported through the caller's own error type.
pub struct SingleFlight<T, E = FetchError> {
    slots: Arc<DashMap<CacheKey, Slot<T, E>>>,
    next_id: AtomicU64,
    deadline: Duration,
    started: AtomicU64,
    joined: AtomicU64,
    timed_out: Arc<AtomicU64>,
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<FetchError> + 'static,
{
    /// Create a coordinator whose executions run under `deadline`.
    pub fn new(deadline: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            deadline,
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
            timed_out: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `job` for `key`, or attach to the execution already running.
    ///
    /// `job` is only invoked when this caller starts a new execution. It is
    /// called while the key's shard is locked and must do nothing but build
    /// the future.
    pub async fn run<F, Fut>(&self, key: CacheKey, job: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = match self.slots.entry(key.clone()) {
            Entry::Occupied(slot) => {
                self.joined.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Joining in-flight fetch");
                slot.get().flight.clone()
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.started.fetch_add(1, Ordering::Relaxed);
                let flight = self.spawn(key.clone(), id, job());
                vacant.insert(Slot {
                    id,
                    flight: flight.clone(),
                });
                flight
            }
        };
        flight.await
    }

    fn spawn<Fut>(&self, key: CacheKey, id: u64, fut: Fut) -> SharedFlight<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let deadline = self.deadline;
        let timed_out = Arc::clone(&self.timed_out);
        let guard = SlotGuard {
            slots: Arc::clone(&self.slots),
            key,
            id,
        };

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_) => {
                    timed_out.fetch_add(1, Ordering::Relaxed);
                    Err(E::from(FetchError::DeadlineExceeded { deadline }))
                }
            }
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(E::from(FetchError::Aborted {
                    reason: join_err.to_string(),
                })),
            }
        }
        .boxed()
        .shared()
    }

    /// Number of executions currently in progress.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Whether an execution for `key` is in progress.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn stats(&self) -> FlightStats {
        FlightStats {
            started: self.started.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use orgpulse_core::EntityKind;
    use std::sync::atomic::AtomicUsize;

    fn key(k: &str) -> CacheKey {
        CacheKey::entity(EntityKind::Page, k)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new(Duration::from_secs(5)));
        let calls = Arc::new(AtomicUsize::new(0));

        let runs = (0..16).map(|_| {
            let flights = Arc::clone(&flights);
            let calls = Arc::clone(&calls);
            async move {
                flights
                    .run(key("acme"), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }
        });
        let results = join_all(runs).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == Ok(7)));
        assert_eq!(flights.in_flight(), 0);
        let stats = flights.stats();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.joined, 15);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let flights: SingleFlight<u32> = SingleFlight::new(Duration::from_secs(5));
        let first = flights
            .run(key("acme"), || async {
                Err(FetchError::SourceUnavailable {
                    reason: "down".into(),
                })
            })
            .await;
        assert!(first.is_err());
        assert_eq!(flights.in_flight(), 0);

        let second = flights.run(key("acme"), || async { Ok(1) }).await;
        assert_eq!(second, Ok(1));
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flights: Arc<SingleFlight<&'static str>> =
            Arc::new(SingleFlight::new(Duration::from_secs(5)));
        let a = flights.run(key("a"), || async { Ok("a") });
        let b = flights.run(key("b"), || async { Ok("b") });
        let (a, b) = tokio::join!(a, b);
        assert_eq!((a, b), (Ok("a"), Ok("b")));
        assert_eq!(flights.stats().started, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_frees_slot() {
        let flights: SingleFlight<u32> = SingleFlight::new(Duration::from_secs(1));
        let result = flights
            .run(key("slow"), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1)
            })
            .await;
        assert_eq!(
            result,
            Err(FetchError::DeadlineExceeded {
                deadline: Duration::from_secs(1)
            })
        );
        assert_eq!(flights.in_flight(), 0);
        assert_eq!(flights.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_cancel_fetch() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new(Duration::from_secs(5)));
        let done = Arc::new(AtomicUsize::new(0));

        let first = {
            let flights = Arc::clone(&flights);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                flights
                    .run(key("acme"), move || async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(3)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.abort();

        // A later caller still joins the surviving execution.
        let joined = flights.run(key("acme"), || async { Ok(99) }).await;
        assert_eq!(joined, Ok(3));
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_job_reports_aborted() {
        let flights: SingleFlight<u32> = SingleFlight::new(Duration::from_secs(5));
        let result = flights
            .run(key("boom"), || async {
                if true {
                    panic!("scraper exploded");
                }
                Ok(0)
            })
            .await;
        assert!(matches!(result, Err(FetchError::Aborted { .. })));
        assert_eq!(flights.in_flight(), 0);
    }
}
