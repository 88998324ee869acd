//! Auth strategy with scripted invalidation.

use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue, StatusCode};
use observable_request_core::auth::{AuthStrategy, RefreshFuture};
use observable_request_core::error::ApiError;
use observable_request_core::transport::HttpResponse;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct AuthState {
    invalidate_on: Vec<StatusCode>,
    refresh_error: Option<ApiError>,
    refreshes: AtomicUsize,
    applied: AtomicUsize,
}

/// Auth strategy whose invalidation and refresh outcome are set by the test.
///
/// It attaches `Authorization: Bearer token-<n>`, where `n` is the number of
/// successful refreshes so far, so a test can tell which credentials a
/// request carried. Clones share counters.
///
/// # Example
///
/// ```
/// use observable_request_testing::ScriptedAuth;
/// use observable_request_core::AuthStrategy;
/// use http::HeaderMap;
///
/// let auth = ScriptedAuth::new().invalidate_on(401);
/// let mut headers = HeaderMap::new();
/// auth.apply_auth(&mut headers);
/// assert_eq!(headers["authorization"], "Bearer token-0");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptedAuth {
    state: Arc<Mutex<AuthState>>,
}

impl ScriptedAuth {
    /// Create a strategy that never invalidates
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: Invalidate on responses with this status
    #[must_use]
    pub fn invalidate_on(self, status: u16) -> Self {
        if let Ok(status) = StatusCode::from_u16(status) {
            self.lock().invalidate_on.push(status);
        }
        self
    }

    /// Builder: Make every refresh fail with `error`
    #[must_use]
    pub fn failing_refresh(self, error: ApiError) -> Self {
        self.lock().refresh_error = Some(error);
        self
    }

    /// Number of successful refreshes
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.lock().refreshes.load(Ordering::SeqCst)
    }

    /// Number of times credentials were applied
    #[must_use]
    pub fn apply_count(&self) -> usize {
        self.lock().applied.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AuthStrategy for ScriptedAuth {
    fn apply_auth(&self, headers: &mut HeaderMap) {
        let state = self.lock();
        state.applied.fetch_add(1, Ordering::SeqCst);
        let generation = state.refreshes.load(Ordering::SeqCst);
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer token-{generation}")) {
            headers.insert(AUTHORIZATION, value);
        }
    }

    fn should_invalidate(&self, response: &HttpResponse) -> bool {
        self.lock().invalidate_on.contains(&response.status)
    }

    fn refresh_token(&self) -> RefreshFuture<'_> {
        let outcome = {
            let state = self.lock();
            match &state.refresh_error {
                Some(error) => Err(error.clone()),
                None => {
                    state.refreshes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            }
        };
        Box::pin(async move { outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_bumps_token_generation() {
        let auth = ScriptedAuth::new().invalidate_on(401);
        assert!(auth.should_invalidate(&HttpResponse::new(StatusCode::UNAUTHORIZED, "")));
        assert!(!auth.should_invalidate(&HttpResponse::new(StatusCode::FORBIDDEN, "")));

        tokio_test::block_on(auth.refresh_token()).unwrap();

        let mut headers = HeaderMap::new();
        auth.apply_auth(&mut headers);
        assert_eq!(headers[AUTHORIZATION], "Bearer token-1");
        assert_eq!(auth.refresh_count(), 1);
        assert_eq!(auth.apply_count(), 1);
    }

    #[test]
    fn test_failing_refresh() {
        let auth = ScriptedAuth::new().failing_refresh(ApiError::http(400));
        let err = tokio_test::block_on(auth.refresh_token()).unwrap_err();
        assert_eq!(err.status, Some(400));
        assert_eq!(auth.refresh_count(), 0);
    }
}
