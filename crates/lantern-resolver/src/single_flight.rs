use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

struct Flight<T> {
    generation: u64,
    future: Shared<BoxFuture<'static, T>>,
}

/// Coalesces concurrent calls that share a request signature.
///
/// At most one underlying future runs per signature; callers arriving
/// while it is pending await the same settlement. The entry is removed
/// once the call settles, whether it succeeded or failed, so a later call
/// starts a fresh attempt. Owned by the resolver instance rather than living in
/// module-level state, so independent resolvers (and tests) do not share
/// in-flight tables.
///
/// Flights are spawned: a caller that no longer needs the result can
/// drop its future without cancelling the underlying work, which still
/// completes and still populates the cache.
pub struct SingleFlight<T> {
    inflight: Mutex<HashMap<String, Flight<T>>>,
    generation: AtomicU64,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Runs `make()` unless a flight for `signature` is already pending,
    /// in which case its settlement is awaited instead.
    pub async fn run<F, Fut>(&self, signature: &str, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (generation, future) = {
            let mut inflight = self.inflight.lock();
            if let Some(flight) = inflight.get(signature) {
                (flight.generation, flight.future.clone())
            } else {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let future = tokio::spawn(make())
                    .map(|joined| joined.expect("in-flight resolution task panicked"))
                    .boxed()
                    .shared();
                inflight.insert(
                    signature.to_owned(),
                    Flight {
                        generation,
                        future: future.clone(),
                    },
                );
                (generation, future)
            }
        };

        let output = future.await;

        // Remove exactly the flight that was awaited; a newer flight under
        // the same signature must not be evicted by a late waiter.
        let mut inflight = self.inflight.lock();
        if inflight
            .get(signature)
            .is_some_and(|flight| flight.generation == generation)
        {
            inflight.remove(signature);
        }

        output
    }

    /// Number of currently pending signatures.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_calls_share_one_execution() {
        let flights = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let run = |flights: Arc<SingleFlight<u32>>, calls: Arc<AtomicUsize>| async move {
            flights
                .run("sig", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    7
                })
                .await
        };

        let (a, b) = tokio::join!(
            run(Arc::clone(&flights), Arc::clone(&calls)),
            run(Arc::clone(&flights), Arc::clone(&calls)),
        );

        assert_eq!((a, b), (7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_signatures_run_independently() {
        let flights = SingleFlight::new();
        let calls = AtomicUsize::new(0);

        for signature in ["a", "b"] {
            flights
                .run(signature, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {}
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn settled_entry_is_removed_and_reattempted() {
        let flights = SingleFlight::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            flights
                .run("sig", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { None::<String> }
                })
                .await;
            assert_eq!(flights.in_flight(), 0);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
