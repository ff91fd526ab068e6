//! Coalescing of concurrent requests for the same computation.
//!
//! The first caller for a key starts the work; callers arriving while it is
//! in flight await the same shared future and receive a clone of its result.
//! Once the work completes the key is forgotten, so a later call starts fresh.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;
type InFlightMap<K, V, E> = HashMap<K, SharedResult<V, E>>;

pub struct SingleFlight<K, V, E> {
    in_flight: Arc<Mutex<InFlightMap<K, V, E>>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(map: &Mutex<InFlightMap<K, V, E>>) -> MutexGuard<'_, InFlightMap<K, V, E>> {
        map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `work` for `key`, or join the run already in flight for it.
    ///
    /// `work` is only invoked by the caller that starts a new flight.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = Self::lock(&self.in_flight);
            match in_flight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let registry = Arc::clone(&self.in_flight);
                    let cleanup_key = key.clone();
                    let work = work();
                    let shared = async move {
                        let result = work.await;
                        Self::lock(&registry).remove(&cleanup_key);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key, shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    /// Whether work for `key` is currently in flight.
    pub fn is_in_flight(&self, key: &K) -> bool {
        Self::lock(&self.in_flight).contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        Self::lock(&self.in_flight).len()
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
