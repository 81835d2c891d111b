//! Keyed single-flight build cache.
//!
//! Frame sequences and track shapes are expensive to build and identical for
//! every viewer of a race, so each is built at most once per key. Requests
//! that arrive while a build is running await that same build instead of
//! starting another one. A failed build is handed to every waiter and then
//! evicted, so the next request for the key starts afresh.

use futures::future::{BoxFuture, FutureExt, Shared, TryFutureExt};
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use raceline_core::ReplayError;

type SharedBuild<V> = Shared<BoxFuture<'static, Result<Arc<V>, ReplayError>>>;

pub struct BuildCache<K, V> {
    name: &'static str,
    entries: Mutex<HashMap<K, SharedBuild<V>>>,
    /// Number of builds started, successful or not
    builds: AtomicUsize,
}

impl<K, V> BuildCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        BuildCache {
            name,
            entries: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    /// Return the value for `key`, running `build` only if no build for it
    /// is cached or in flight.
    pub async fn get_or_build<F, Fut>(&self, key: K, build: F) -> Result<Arc<V>, ReplayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ReplayError>> + Send + 'static,
    {
        let shared = {
            let mut entries = self.entries();
            match entries.get(&key) {
                Some(in_flight) => in_flight.clone(),
                None => {
                    self.builds.fetch_add(1, Ordering::Relaxed);
                    debug!("{}: building {:?}", self.name, key);
                    let shared = build().map_ok(Arc::new).boxed().shared();
                    entries.insert(key.clone(), shared.clone());
                    shared
                }
            }
        };

        let result = shared.clone().await;
        if let Err(e) = &result {
            let mut entries = self.entries();
            // Only evict our own build; a retry may already have replaced it
            if entries.get(&key).is_some_and(|current| current.ptr_eq(&shared)) {
                warn!("{}: build of {:?} failed: {}", self.name, key, e);
                entries.remove(&key);
            }
        }
        result
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries().remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, SharedBuild<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
