//! # Observable Request Core
//!
//! Core traits and types for turning repeated, possibly concurrent HTTP calls
//! into a deduplicated, cached, observable stream of request lifecycle states.
//!
//! This crate holds the data model and the seams only. Implementations live in
//! `observable-request-runtime` (cache, transport, orchestrator) and
//! `observable-request-http` (the `reqwest`-backed [`transport::Fetch`]).
//!
//! ## Core Concepts
//!
//! - **[`RequestState`]**: lifecycle snapshot of one logical request
//!   (`data`, `error`, `loading`, `called`, `completed`)
//! - **Request key**: `METHOD + "/" + full URL`, the identity used for caching
//!   and in-flight deduplication (see [`query::request_key`])
//! - **[`transport::Fetch`]**: the "perform one HTTP call" capability
//! - **[`auth::AuthStrategy`]**: how credentials are attached, invalidated and refreshed
//! - **[`compare::DataComparator`]**: optional payload equality used to suppress
//!   redundant cache notifications
//! - **[`environment::Clock`]**: injected time source so TTLs are testable
//!
//! ## Example
//!
//! ```
//! use observable_request_core::{RequestState, query::{Query, request_key}};
//! use http::Method;
//!
//! let path = Query::from("users").to_path();
//! assert_eq!(path, "/users");
//! assert_eq!(request_key(&Method::GET, &path), "GET//users");
//!
//! let state: RequestState<serde_json::Value> = RequestState::in_progress();
//! assert!(state.loading && state.called && !state.completed);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Authentication strategy seam
pub mod auth;

/// Payload equality used by the cache
pub mod compare;

/// Error taxonomy surfaced to callers
pub mod error;

/// Query normalization and request keys
pub mod query;

/// Request lifecycle state
pub mod state;

/// HTTP value types and the transport seams
pub mod transport;

/// Environment module - Dependency injection traits
///
/// External dependencies that make behavior time-dependent are abstracted
/// behind traits so tests can drive them deterministically.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// The cache computes entry expiry from this clock, so a manual clock in
    /// tests makes TTL behavior exact.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use auth::AuthStrategy;
pub use compare::{DataComparator, DeepEquality};
pub use error::{ApiError, ApiErrorKind, FetchError};
pub use query::Query;
pub use transport::{
    CallOptions, Fetch, FormData, FormPart, HttpRequest, HttpRequestService, HttpResponse, RequestBody,
    call_as,
};
pub use state::{ApiState, RequestPhase, RequestState, StatePatch};
