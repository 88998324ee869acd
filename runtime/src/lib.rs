//! # Observable Request Runtime
//!
//! Runtime implementation of the observable request layer.
//!
//! This crate provides the cache, the transport and the orchestrator that
//! turn repeated, possibly concurrent HTTP calls into one deduplicated,
//! cached stream of [`RequestState`](observable_request_core::RequestState)
//! snapshots per request key.
//!
//! ## Core Components
//!
//! - **[`CacheController`]**: TTL-keyed store with change notification and
//!   optional equality suppression
//! - **[`ApiRequest`]**: transport applying auth, a timeout and one
//!   refresh-and-retry
//! - **[`ObservableRequestService`]**: computes request keys, deduplicates
//!   in-flight calls, drives the transport and writes results to the cache
//! - **[`StateSubject`]**: per-key multicast stream replaying the latest state
//!
//! ## Example
//!
//! ```ignore
//! use observable_request_runtime::{ExecutionOptions, ObservableRequestService, RequestOptions};
//! use observable_request_runtime::config::ServiceConfig;
//! use observable_request_runtime::auth::PassThroughAuth;
//!
//! let config = ServiceConfig::default().with_base_url("https://api.example.com");
//! let service = ObservableRequestService::from_config(&config, fetch, Arc::new(PassThroughAuth))?;
//!
//! let handle = service.create_api_request("users", RequestOptions::new(), ExecutionOptions::eager());
//! let mut states = handle.subscribe();
//! while let Some(state) = states.next().await {
//!     println!("loading={} data={:?}", state.loading, state.data());
//! }
//! ```

/// Authentication strategies
pub mod auth;

/// TTL-keyed request-state cache
pub mod cache;

/// Configuration with defaults and environment loading
pub mod config;

/// Prometheus metrics for observability
pub mod metrics;

/// The request orchestrator
pub mod service;

/// Replaying multicast channel
pub mod subject;

/// Authenticated transport with timeout and refresh-retry
pub mod transport;

pub use auth::{PassThroughAuth, TokenAuthStrategy};
pub use cache::{CacheController, CacheSubscription};
pub use config::{CacheConfig, ConfigError, ServiceConfig};
pub use service::{ApiRequestHandle, ExecutionOptions, Executor, ObservableRequestService, RequestOptions};
pub use subject::{StateStream, StateSubject};
pub use transport::ApiRequest;
