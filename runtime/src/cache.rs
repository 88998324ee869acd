//! Keyed request-state cache with TTL expiry and change notification.
//!
//! Entries are evicted lazily: only a [`get`](CacheController::get) that finds
//! an expired entry removes it. Every write goes through a single write lock,
//! so the "read previous, compare, store, notify" sequence is atomic with
//! respect to other writers and observers see writes in the order they were
//! stored.

use crate::config::CacheConfig;
use crate::metrics::CacheMetrics;
use chrono::{DateTime, Utc};
use observable_request_core::compare::{DataComparator, DeepEquality};
use observable_request_core::environment::{Clock, SystemClock};
use observable_request_core::error::ApiError;
use observable_request_core::state::{RequestState, StatePatch};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// Callback invoked with every notified state of one key.
pub type Observer<T, E> = Arc<dyn Fn(&RequestState<T, E>) + Send + Sync>;

struct CacheEntry<T, E> {
    state: RequestState<T, E>,
    expiry: DateTime<Utc>,
}

struct ObserverSlot<T, E> {
    id: u64,
    key: String,
    callback: Observer<T, E>,
}

type Observers<T, E> = Mutex<Vec<ObserverSlot<T, E>>>;

/// Keyed store of the latest known [`RequestState`] per request key.
///
/// # Observers
///
/// Observers are called synchronously while the write lock is held. They
/// must not write back into the same cache.
///
/// # Example
///
/// ```
/// use observable_request_runtime::cache::CacheController;
/// use observable_request_core::{ApiError, RequestState};
/// use std::time::Duration;
///
/// let cache: CacheController<u32, ApiError> = CacheController::new(Duration::from_secs(60));
/// cache.set("GET//n", RequestState::succeeded(1), None);
///
/// assert!(cache.has("GET//n"));
/// assert_eq!(cache.get("GET//n").and_then(|s| s.data().copied()), Some(1));
/// ```
pub struct CacheController<T, E = ApiError> {
    entries: Mutex<HashMap<String, CacheEntry<T, E>>>,
    observers: Arc<Observers<T, E>>,
    next_observer: AtomicU64,
    writes: Mutex<()>,
    comparator: Option<Arc<dyn DataComparator<T>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<T, E> CacheController<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a cache that always notifies, using the system clock.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            observers: Arc::new(Mutex::new(Vec::new())),
            next_observer: AtomicU64::new(0),
            writes: Mutex::new(()),
            comparator: None,
            default_ttl,
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a cache from configuration.
    ///
    /// With `compare_data_on_set` the cache suppresses notifications for
    /// writes that change nothing, using [`DeepEquality`].
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self
    where
        T: PartialEq,
    {
        let cache = Self::new(config.default_ttl());
        if config.compare_data_on_set {
            cache.with_comparator(DeepEquality)
        } else {
            cache
        }
    }

    /// Builder: Install a payload comparator
    #[must_use]
    pub fn with_comparator(mut self, comparator: impl DataComparator<T> + 'static) -> Self {
        self.comparator = Some(Arc::new(comparator));
        self
    }

    /// Builder: Replace the time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// TTL used when a write does not specify one.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Check whether an entry exists for `key`.
    ///
    /// Expiry is not checked here. An expired entry counts as present until a
    /// [`get`](Self::get) evicts it.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Return the stored state if it has not expired.
    ///
    /// An expired entry is removed and `None` is returned.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<RequestState<T, E>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = entries.get(key)?;
        if entry.expiry > now {
            return Some(entry.state.clone());
        }

        entries.remove(key);
        CacheMetrics::record_eviction();
        tracing::trace!(key, "Evicted expired cache entry");
        None
    }

    /// Store `state` for `key` with `expiry = now + ttl`.
    ///
    /// With a comparator installed, an incoming payload equal to the stored
    /// one is replaced by the stored allocation. If, in addition, `error`,
    /// `loading`, `called` and `completed` are unchanged, the write is stored
    /// but observers are not notified.
    pub fn set(&self, key: &str, state: RequestState<T, E>, ttl: Option<Duration>) {
        let _write = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(key, state, ttl);
    }

    /// Overlay `patch` on the current state and [`set`](Self::set) the result.
    ///
    /// A missing or expired entry is treated as the in-progress state.
    pub fn merge(&self, key: &str, patch: StatePatch<T, E>, ttl: Option<Duration>) {
        let _write = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.get(key).unwrap_or_else(RequestState::in_progress);
        self.write(key, patch.apply(base), ttl);
    }

    /// Observe every notified state for `key`.
    ///
    /// The subscription stays active until [`CacheSubscription::unsubscribe`]
    /// is called; dropping the handle does not detach the observer.
    pub fn subscribe<F>(&self, key: &str, observer: F) -> CacheSubscription<T, E>
    where
        F: Fn(&RequestState<T, E>) + Send + Sync + 'static,
    {
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ObserverSlot {
                id,
                key: key.to_string(),
                callback: Arc::new(observer),
            });

        CacheSubscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Caller holds the write lock.
    fn write(&self, key: &str, mut state: RequestState<T, E>, ttl: Option<Duration>) {
        let mut suppress = false;

        let previous = self.comparator.as_ref().and_then(|cmp| Some((cmp, self.get(key)?)));
        if let Some((comparator, previous)) = previous {
            let data_kept = match (&previous.data, &state.data) {
                (Some(old), Some(new)) if Arc::ptr_eq(old, new) || comparator.equals(old, new) => {
                    state.data = Some(Arc::clone(old));
                    true
                },
                _ => false,
            };
            suppress = data_kept && previous.same_flags(&state);
        }

        let expiry = self.expiry_after(ttl.unwrap_or(self.default_ttl));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                CacheEntry {
                    state: state.clone(),
                    expiry,
                },
            );
        CacheMetrics::record_write();

        if suppress {
            CacheMetrics::record_suppressed();
            tracing::trace!(key, "Cache write unchanged, notification suppressed");
            return;
        }

        tracing::trace!(
            key,
            loading = state.loading,
            completed = state.completed,
            "Cache write"
        );
        self.notify(key, &state);
    }

    fn notify(&self, key: &str, state: &RequestState<T, E>) {
        let callbacks: Vec<Observer<T, E>> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|slot| slot.key == key)
            .map(|slot| Arc::clone(&slot.callback))
            .collect();

        for callback in callbacks {
            callback(state);
        }
    }

    fn expiry_after(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Handle returned by [`CacheController::subscribe`].
pub struct CacheSubscription<T, E = ApiError> {
    id: u64,
    observers: Weak<Observers<T, E>>,
}

impl<T, E> CacheSubscription<T, E> {
    /// Detach the observer. Writes after this call are not delivered to it.
    pub fn unsubscribe(self) {
        if let Some(observers) = self.observers.upgrade() {
            observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|slot| slot.id != self.id);
        }
    }
}

impl<T, E> std::fmt::Debug for CacheSubscription<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSubscription").field("id", &self.id).finish()
    }
}

impl<T, E> std::fmt::Debug for CacheController<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheController")
            .field("default_ttl", &self.default_ttl)
            .field("compare_on_set", &self.comparator.is_some())
            .finish_non_exhaustive()
    }
}
