//! # Observable Request Testing
//!
//! Testing utilities for the observable request layer.
//!
//! This crate provides:
//! - [`MockFetch`]: scripted [`Fetch`](observable_request_core::Fetch) that
//!   records every request
//! - [`ScriptedAuth`]: auth strategy with configurable invalidation and
//!   refresh counting
//! - [`ManualClock`]: time that only moves when the test says so
//! - [`init_test_tracing`]: log output for failing tests
//!
//! ## Example
//!
//! ```ignore
//! use observable_request_testing::{MockFetch, Reply};
//!
//! #[tokio::test]
//! async fn test_single_call() {
//!     let fetch = MockFetch::new().always(Reply::json(200, json!({ "id": 1 })));
//!     let service = ObservableRequestService::new(
//!         Arc::new(ApiRequest::without_auth(Arc::new(fetch.clone()))),
//!         Arc::new(CacheController::new(Duration::from_millis(100))),
//!     );
//!
//!     let _handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
//!     assert_eq!(fetch.call_count(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use observable_request_core::environment::Clock;

mod auth_mocks;
mod fetch_mocks;

pub use auth_mocks::ScriptedAuth;
pub use fetch_mocks::{Gate, MockFetch, Reply};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, PoisonError, RwLock};
    use std::time::Duration;

    /// Manually advanced clock for deterministic TTL tests
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the cache.
    ///
    /// # Example
    ///
    /// ```
    /// use observable_request_testing::mocks::test_clock;
    /// use observable_request_core::environment::Clock;
    /// use std::time::Duration;
    ///
    /// let clock = test_clock();
    /// let start = clock.now();
    /// clock.advance(Duration::from_millis(250));
    /// assert_eq!((clock.now() - start).num_milliseconds(), 250);
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move time forward
        pub fn advance(&self, by: Duration) {
            let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time = time.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
        }

        /// Jump to an absolute time
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a manual clock for tests stopped at 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn test_clock() -> ManualClock {
        ManualClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Test helpers and utilities
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-writer tracing subscriber honoring `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_test_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use helpers::init_test_tracing;
pub use mocks::{ManualClock, test_clock};
