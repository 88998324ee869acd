//! The request orchestrator.
//!
//! [`ObservableRequestService::create_api_request`] turns a logical query
//! into a request key, hands back the key's replaying state stream, and
//! (unless lazy) starts the call. Two calls with the same method and URL
//! always share one cache entry, one stream and at most one in-flight call.
//!
//! # Flow
//!
//! ```text
//! create_api_request ─▶ key = METHOD/base_url+path
//!        │
//!        ▼
//!   execute ──(fresh cache entry or key pending)──▶ skip
//!        │
//!        ├─▶ pending += key
//!        ├─▶ cache.merge(in-progress)          ─┐
//!        └─▶ spawn transport call               │ cache observers
//!               ├─ Ok  ─▶ cache.set(success)    ├─▶ StateSubject ─▶ subscribers
//!               ├─ Err ─▶ cache.merge(failure) ─┘
//!               └─ pending -= key
//! ```

use crate::cache::CacheController;
use crate::config::{ConfigError, ServiceConfig};
use crate::metrics::RequestMetrics;
use crate::subject::{StateStream, StateSubject};
use crate::transport::ApiRequest;
use futures::FutureExt;
use http::{HeaderName, HeaderValue, Method};
use observable_request_core::auth::AuthStrategy;
use observable_request_core::error::ApiError;
use observable_request_core::query::{Query, request_key};
use observable_request_core::state::{ApiState, RequestState, StatePatch};
use observable_request_core::transport::{CallOptions, Fetch, HttpRequestService, RequestBody};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Options for one `create_api_request` call.
///
/// `cache_ttl` and `ignore_cache` only affect cache interaction; timeout and
/// refresh behavior live in [`CallOptions`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Options forwarded to the transport
    pub call: CallOptions,
    /// TTL for the cache writes of this request (cache default when `None`)
    pub cache_ttl: Option<Duration>,
    /// Run even if a fresh cache entry exists
    pub ignore_cache: bool,
}

impl RequestOptions {
    /// Default options: GET, cache honored
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: Set the method
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.call.method = method;
        self
    }

    /// Builder: Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.call.body = body.into();
        self
    }

    /// Builder: Insert a header
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.call.headers.insert(name, value);
        self
    }

    /// Builder: Set the transport timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call.timeout = timeout;
        self
    }

    /// Builder: Set the cache TTL
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Builder: Bypass a fresh cache entry
    #[must_use]
    pub const fn with_ignore_cache(mut self, ignore: bool) -> Self {
        self.ignore_cache = ignore;
        self
    }
}

/// How `create_api_request` starts the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Return an [`Executor`] instead of running immediately
    pub lazy: bool,
}

impl ExecutionOptions {
    /// Eager execution (the default)
    #[must_use]
    pub const fn eager() -> Self {
        Self { lazy: false }
    }

    /// Lazy execution: nothing runs until [`Executor::execute`]
    #[must_use]
    pub const fn lazy() -> Self {
        Self { lazy: true }
    }
}

struct Inner {
    transport: Arc<dyn HttpRequestService>,
    cache: Arc<CacheController<Value, ApiError>>,
    base_url: String,
    subjects: Mutex<HashMap<String, Arc<StateSubject<ApiState>>>>,
    pending: Mutex<HashSet<String>>,
}

/// Deduplicating, caching request orchestrator.
///
/// Cheap to clone; clones share the cache, the streams and the pending set.
///
/// # Example
///
/// ```ignore
/// let service = ObservableRequestService::from_config(&config, fetch, auth)?;
/// let handle = service.create_api_request("users", RequestOptions::new(), ExecutionOptions::eager());
///
/// let mut states = handle.subscribe();
/// while let Some(state) = states.next().await {
///     if state.completed {
///         break;
///     }
/// }
/// ```
#[derive(Clone)]
pub struct ObservableRequestService {
    inner: Arc<Inner>,
}

impl ObservableRequestService {
    /// Create an orchestrator over an existing transport and cache.
    #[must_use]
    pub fn new(transport: Arc<dyn HttpRequestService>, cache: Arc<CacheController<Value, ApiError>>) -> Self {
        Self::with_settings(transport, cache, String::new())
    }

    /// Create an orchestrator joining `base_url` to every normalized path.
    #[must_use]
    pub fn with_settings(
        transport: Arc<dyn HttpRequestService>,
        cache: Arc<CacheController<Value, ApiError>>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                cache,
                base_url: base_url.into(),
                subjects: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Wire an [`ApiRequest`] transport and a [`CacheController`] from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the configuration is invalid.
    pub fn from_config(
        config: &ServiceConfig,
        fetch: Arc<dyn Fetch>,
        auth: Arc<dyn AuthStrategy>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = Arc::new(ApiRequest::new(fetch, auth));
        let cache = Arc::new(CacheController::from_config(&config.cache));
        Ok(Self::with_settings(transport, cache, config.base_url.clone()))
    }

    /// The cache this orchestrator writes into.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheController<Value, ApiError>> {
        &self.inner.cache
    }

    /// Resolve a query to `(full URL, request key)` for `method`.
    #[must_use]
    pub fn resolve(&self, query: &Query, method: &Method) -> (String, String) {
        let url = format!("{}{}", self.inner.base_url, query.to_path());
        let key = request_key(method, &url);
        (url, key)
    }

    /// Check whether a transport call is outstanding for `key`.
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Create (or join) the request for `query`.
    ///
    /// Eager execution starts the call before returning, so the in-progress
    /// state is already visible to the first subscriber. Lazy execution
    /// returns an [`Executor`] and runs nothing.
    ///
    /// Must be called within a Tokio runtime for the call to run; without
    /// one the request settles immediately with an unknown error.
    #[must_use]
    pub fn create_api_request(
        &self,
        query: impl Into<Query>,
        options: RequestOptions,
        execution: ExecutionOptions,
    ) -> ApiRequestHandle {
        let query = query.into();
        let (url, key) = self.resolve(&query, &options.call.method);
        tracing::debug!(
            url,
            key,
            ignore_cache = options.ignore_cache,
            lazy = execution.lazy,
            "create_api_request"
        );

        let subject = self.subject_for(&key);
        let executor = Executor {
            service: self.clone(),
            request: Arc::new(PreparedRequest {
                key: key.clone(),
                url,
                options: options.clone(),
            }),
        };

        let executor = if execution.lazy {
            Some(executor)
        } else {
            executor.execute();
            None
        };

        ApiRequestHandle {
            key,
            subject,
            executor,
            service: self.clone(),
            query,
            options,
        }
    }

    fn subject_for(&self, key: &str) -> Arc<StateSubject<ApiState>> {
        let inner = &self.inner;
        let mut subjects = inner.subjects.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(subject) = subjects.get(key) {
            return Arc::clone(subject);
        }

        let subject = Arc::new(StateSubject::new());
        let sink = Arc::clone(&subject);
        // Never unsubscribed: the stream lives as long as the orchestrator
        let _subscription = inner
            .cache
            .subscribe(key, move |state: &ApiState| sink.publish(state.clone()));

        // A key warmed by another writer starts from its cached state
        if let Some(state) = inner.cache.get(key) {
            subject.publish_if_empty(state);
        }

        subjects.insert(key.to_string(), Arc::clone(&subject));
        tracing::trace!(key, "Created state stream");
        subject
    }

    fn start(&self, request: &Arc<PreparedRequest>) -> bool {
        let inner = &self.inner;
        let key = request.key.as_str();
        let ttl = request.options.cache_ttl;

        {
            let mut pending = inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let fresh = !request.options.ignore_cache && inner.cache.get(key).is_some();
            if fresh || pending.contains(key) {
                RequestMetrics::record_deduplicated();
                tracing::debug!(key, fresh, "Request skipped, served by cache or in-flight call");
                return false;
            }
            pending.insert(key.to_string());
        }

        inner.cache.merge(key, StatePatch::in_progress(), ttl);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key, "No Tokio runtime available, request settled as failed");
            let _pending = PendingGuard {
                inner: Arc::clone(inner),
                key: key.to_string(),
            };
            let error = ApiError::unknown().with_details(Value::String("no async runtime".to_string()));
            inner.cache.merge(key, StatePatch::failed(error), ttl);
            return true;
        };

        RequestMetrics::record_created();
        runtime.spawn(settle(Arc::clone(inner), Arc::clone(request)));
        true
    }
}

impl std::fmt::Debug for ObservableRequestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableRequestService")
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

/// Run the transport call and write the terminal state.
async fn settle(inner: Arc<Inner>, request: Arc<PreparedRequest>) {
    let _pending = PendingGuard {
        inner: Arc::clone(&inner),
        key: request.key.clone(),
    };
    let key = request.key.as_str();
    let ttl = request.options.cache_ttl;

    let call = inner.transport.call(&request.url, request.options.call.clone());
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(data)) => {
            tracing::debug!(key, "Request resolved");
            inner.cache.set(key, RequestState::succeeded(data), ttl);
        },
        Ok(Err(error)) => {
            tracing::debug!(key, error = %error, "Request failed");
            inner.cache.merge(key, StatePatch::failed(error), ttl);
        },
        Err(_) => {
            tracing::error!(key, "Transport panicked, request settled as failed");
            inner.cache.merge(key, StatePatch::failed(ApiError::unknown()), ttl);
        },
    }
}

/// Removes the key from the pending set on drop, whatever happened.
struct PendingGuard {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

struct PreparedRequest {
    key: String,
    url: String,
    options: RequestOptions,
}

/// Starts a lazily created request.
#[derive(Clone)]
pub struct Executor {
    service: ObservableRequestService,
    request: Arc<PreparedRequest>,
}

impl Executor {
    /// Run the request unless a fresh cache entry or an in-flight call for
    /// the same key already covers it.
    ///
    /// Returns `true` when a call was started.
    pub fn execute(&self) -> bool {
        self.service.start(&self.request)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("key", &self.request.key).finish()
    }
}

/// Result of [`ObservableRequestService::create_api_request`].
pub struct ApiRequestHandle {
    key: String,
    subject: Arc<StateSubject<ApiState>>,
    executor: Option<Executor>,
    service: ObservableRequestService,
    query: Query,
    options: RequestOptions,
}

impl ApiRequestHandle {
    /// The request key shared by every caller of the same method and URL.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The key's state stream.
    #[must_use]
    pub fn subject(&self) -> &Arc<StateSubject<ApiState>> {
        &self.subject
    }

    /// Subscribe to the key's states, starting with the latest one.
    #[must_use]
    pub fn subscribe(&self) -> StateStream<ApiState> {
        self.subject.subscribe()
    }

    /// The latest state emitted for the key.
    #[must_use]
    pub fn latest(&self) -> Option<ApiState> {
        self.subject.latest()
    }

    /// The executor, present only for lazy requests.
    #[must_use]
    pub const fn executor(&self) -> Option<&Executor> {
        self.executor.as_ref()
    }

    /// Create the same request again with `ignore_cache` set, executing eagerly.
    ///
    /// A call already in flight for the key is still deduplicated.
    #[must_use]
    pub fn refetch(&self) -> Self {
        let options = self.options.clone().with_ignore_cache(true);
        self.service
            .create_api_request(self.query.clone(), options, ExecutionOptions::eager())
    }
}

impl std::fmt::Debug for ApiRequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequestHandle")
            .field("key", &self.key)
            .field("lazy", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}
