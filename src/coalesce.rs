//! Request Coalescer
//!
//! Collapses concurrent identical requests into one shared execution.
//!
//! The first caller for a fingerprint spawns the work; anyone arriving with
//! the same fingerprint within the dedup window awaits the same outcome.
//! The spawned task always runs to completion, even if every caller goes away.
//! A successful outcome stays replayable until the window (measured from the
//! start of execution) passes. A failed outcome is handed to everyone already
//! waiting and then dropped, so the next caller retries fresh.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{Method, Uri};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::cache::Sweep;
use crate::error::CacheError;

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct InFlight<T, E> {
    outcome: SharedOutcome<T, E>,
    started: Instant,
    id: u64,
}

type InFlightMap<T, E> = Arc<Mutex<HashMap<String, InFlight<T, E>>>>;

/// Default fingerprint of an HTTP request: method, path and query.
pub fn fingerprint(method: &Method, uri: &Uri) -> String {
    let target = uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str());
    format!("{}:{}", method, target)
}

// == Coalescer Stats ==
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CoalescerStats {
    /// Executions actually started
    pub executions: u64,
    /// Callers that joined an existing execution
    pub joined: u64,
    /// Fingerprints currently tracked
    pub tracked: usize,
}

// == Request Coalescer ==
pub struct RequestCoalescer<T, E> {
    ttl: Duration,
    in_flight: InFlightMap<T, E>,
    next_id: AtomicU64,
    executions: AtomicU64,
    joined: AtomicU64,
}

impl<T, E> RequestCoalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<CacheError> + 'static,
{
    /// Creates a coalescer whose entries stay shareable for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // == Execute ==
    /// Runs `work` for `fingerprint` unless an identical execution is
    /// already shareable, in which case its outcome is returned instead.
    pub async fn execute<F, Fut>(&self, fingerprint: &str, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let outcome = {
            let mut in_flight = self.in_flight.lock();
            in_flight.retain(|_, entry| entry.started.elapsed() < self.ttl);

            match in_flight.get(fingerprint) {
                Some(existing) => {
                    self.joined.fetch_add(1, Ordering::Relaxed);
                    debug!(fingerprint, "Joined in-flight request");
                    existing.outcome.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let started = Instant::now();
                    let outcome = self.spawn(fingerprint, id, started, work());
                    in_flight.insert(
                        fingerprint.to_string(),
                        InFlight {
                            outcome: outcome.clone(),
                            started,
                            id,
                        },
                    );
                    self.executions.fetch_add(1, Ordering::Relaxed);
                    outcome
                }
            }
        };

        outcome.await
    }

    /// Spawns `work` and returns its shareable outcome.
    ///
    /// A failure removes the entry as soon as it settles. A success is
    /// removed once the window measured from `started` has passed, whether
    /// or not anyone is still awaiting it.
    fn spawn<Fut>(&self, fingerprint: &str, id: u64, started: Instant, work: Fut) -> SharedOutcome<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = fingerprint.to_string();
        let ttl = self.ttl;

        let expire_map = Arc::clone(&self.in_flight);
        let expire_key = key.clone();
        let task = tokio::spawn(async move {
            let result = work.await;
            match (&result, started.checked_add(ttl)) {
                (Err(_), _) => remove_if_current(&expire_map, &expire_key, id),
                (Ok(_), Some(deadline)) => {
                    tokio::spawn(async move {
                        tokio::time::sleep_until(deadline.into()).await;
                        remove_if_current(&expire_map, &expire_key, id);
                    });
                }
                (Ok(_), None) => {}
            }
            result
        });

        let in_flight = Arc::clone(&self.in_flight);
        async move {
            let result = match task.await {
                Ok(result) => result,
                Err(err) => Err(E::from(CacheError::Handler(format!(
                    "coalesced execution aborted: {}",
                    err
                )))),
            };

            if result.is_err() {
                remove_if_current(&in_flight, &key, id);
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Drops every settled outcome so the next caller executes fresh.
    /// Executions still running stay shareable.
    pub fn forget_settled(&self) -> usize {
        let mut in_flight = self.in_flight.lock();
        let before = in_flight.len();
        in_flight.retain(|_, entry| entry.outcome.peek().is_none());
        before - in_flight.len()
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            executions: self.executions.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            tracked: self.in_flight.lock().len(),
        }
    }
}

/// Removes `key` only if it still belongs to execution `id`.
fn remove_if_current<T, E>(in_flight: &Mutex<HashMap<String, InFlight<T, E>>>, key: &str, id: u64) {
    let mut in_flight = in_flight.lock();
    if in_flight.get(key).is_some_and(|entry| entry.id == id) {
        in_flight.remove(key);
    }
}

impl<T, E> Sweep for RequestCoalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn label(&self) -> &str {
        "coalescer"
    }

    /// Removes entries whose dedup window has passed.
    fn sweep(&self) -> usize {
        let mut in_flight = self.in_flight.lock();
        let before = in_flight.len();
        in_flight.retain(|_, entry| entry.started.elapsed() < self.ttl);
        before - in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Coalescer = RequestCoalescer<String, CacheError>;

    fn counted(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        result: std::result::Result<&'static str, &'static str>,
    ) -> impl Future<Output = std::result::Result<String, CacheError>> + Send + 'static {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            result
                .map(String::from)
                .map_err(|msg| CacheError::Handler(msg.to_string()))
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let coalescer = Coalescer::new(Duration::from_secs(5));
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            coalescer.execute("GET:/users", || counted(&calls, Duration::from_millis(50), Ok("list"))),
            coalescer.execute("GET:/users", || counted(&calls, Duration::from_millis(50), Ok("other"))),
        );

        assert_eq!(a.unwrap(), "list");
        assert_eq!(b.unwrap(), "list");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = coalescer.stats();
        assert_eq!((stats.executions, stats.joined), (1, 1));
    }

    #[tokio::test]
    async fn test_shared_failure_reaches_all_waiters_then_clears() {
        let coalescer = Coalescer::new(Duration::from_secs(5));
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            coalescer.execute("k", || counted(&calls, Duration::from_millis(30), Err("boom"))),
            coalescer.execute("k", || counted(&calls, Duration::from_millis(30), Err("boom"))),
        );
        assert_eq!(a, Err(CacheError::Handler("boom".into())));
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // the failure is not replayed to later callers
        let retry = coalescer
            .execute("k", || counted(&calls, Duration::ZERO, Ok("recovered")))
            .await;
        assert_eq!(retry.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_replayed_within_window_and_recomputed_after() {
        let coalescer = Coalescer::new(Duration::from_millis(80));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = coalescer.execute("k", || counted(&calls, Duration::ZERO, Ok("v1"))).await;
        let replay = coalescer.execute("k", || counted(&calls, Duration::ZERO, Ok("v2"))).await;
        assert_eq!(first.unwrap(), "v1");
        assert_eq!(replay.unwrap(), "v1");

        tokio::time::sleep(Duration::from_millis(100)).await;

        let fresh = coalescer.execute("k", || counted(&calls, Duration::ZERO, Ok("v3"))).await;
        assert_eq!(fresh.unwrap(), "v3");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_different_fingerprints_run_independently() {
        let coalescer = Coalescer::new(Duration::from_secs(5));
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            coalescer.execute("GET:/a", || counted(&calls, Duration::from_millis(10), Ok("a"))),
            coalescer.execute("GET:/b", || counted(&calls, Duration::from_millis(10), Ok("b"))),
        );
        assert_eq!((a.unwrap(), b.unwrap()), ("a".to_string(), "b".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_execution_completes_when_caller_is_dropped() {
        let coalescer = Arc::new(Coalescer::new(Duration::from_secs(5)));
        let calls = Arc::new(AtomicUsize::new(0));

        let abandoned = {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                coalescer
                    .execute("k", || counted(&calls, Duration::from_millis(50), Ok("done")))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        abandoned.abort();

        let joined = coalescer
            .execute("k", || counted(&calls, Duration::ZERO, Ok("second")))
            .await;
        assert_eq!(joined.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fingerprint_includes_query() {
        let uri: Uri = "/api/v1/users?page=2".parse().unwrap();
        assert_eq!(fingerprint(&Method::GET, &uri), "GET:/api/v1/users?page=2");
        assert_ne!(
            fingerprint(&Method::GET, &uri),
            fingerprint(&Method::GET, &"/api/v1/users".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_settled_entries_leave_after_window_without_sweep() {
        let coalescer = Coalescer::new(Duration::from_millis(20));
        let calls = Arc::new(AtomicUsize::new(0));

        for i in 0..200 {
            let key = format!("GET:/users?page={}", i);
            coalescer.execute(&key, || counted(&calls, Duration::ZERO, Ok("page"))).await.unwrap();
        }
        assert_eq!(coalescer.stats().tracked, 200);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(coalescer.stats().tracked, 0);

        coalescer.execute("GET:/users", || counted(&calls, Duration::ZERO, Ok("list"))).await.unwrap();
        assert_eq!(coalescer.stats().tracked, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_pruned_on_next_call() {
        let coalescer = Arc::new(Coalescer::new(Duration::from_millis(20)));
        let calls = Arc::new(AtomicUsize::new(0));

        // still running when its window closes, so no timer removes it
        let slow = {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                coalescer
                    .execute("slow", || counted(&calls, Duration::from_millis(200), Ok("slow")))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;

        coalescer.execute("fast", || counted(&calls, Duration::ZERO, Ok("fast"))).await.unwrap();
        assert_eq!(coalescer.stats().tracked, 1);
        slow.abort();
    }

    #[tokio::test]
    async fn test_sweep_and_forget_settled() {
        let coalescer = Arc::new(Coalescer::new(Duration::from_millis(20)));
        let calls = Arc::new(AtomicUsize::new(0));

        coalescer.execute("a", || counted(&calls, Duration::ZERO, Ok("a"))).await.unwrap();
        assert_eq!(coalescer.forget_settled(), 1);

        let slow = {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                coalescer
                    .execute("b", || counted(&calls, Duration::from_millis(200), Ok("b")))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;

        // running executions are never forgotten, but leave once their window passes
        assert_eq!(coalescer.forget_settled(), 0);
        assert_eq!(coalescer.sweep(), 1);
        assert_eq!(coalescer.stats().tracked, 0);
        slow.abort();
    }
}
