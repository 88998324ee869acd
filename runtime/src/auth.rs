//! Authentication strategies.

use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue, StatusCode};
use observable_request_core::auth::{AuthStrategy, RefreshFuture};
use observable_request_core::error::ApiError;
use observable_request_core::transport::HttpResponse;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

/// Reads the current credential.
pub type TokenReader = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Persists a credential; `None` clears it.
pub type TokenWriter = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// Obtains a fresh credential.
pub type TokenRefresher =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<String, ApiError>> + Send>> + Send + Sync>;

/// Attaches nothing, never invalidates, refreshes instantly.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughAuth;

impl AuthStrategy for PassThroughAuth {
    fn apply_auth(&self, _headers: &mut HeaderMap) {}

    fn should_invalidate(&self, _response: &HttpResponse) -> bool {
        false
    }

    fn refresh_token(&self) -> RefreshFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// Bearer-token strategy over externally supplied credential storage.
///
/// Without a refresher the strategy never invalidates. With one, a `401`
/// response triggers a refresh whose result is handed to the writer, which
/// must make it visible to the reader.
///
/// # Example
///
/// ```
/// use observable_request_runtime::auth::TokenAuthStrategy;
/// use observable_request_core::AuthStrategy;
/// use http::{HeaderMap, header::AUTHORIZATION};
///
/// let auth = TokenAuthStrategy::in_memory(Some("abc".to_string()));
/// let mut headers = HeaderMap::new();
/// auth.apply_auth(&mut headers);
///
/// assert_eq!(headers[AUTHORIZATION], "Bearer abc");
/// ```
#[derive(Clone)]
pub struct TokenAuthStrategy {
    read: TokenReader,
    write: Option<TokenWriter>,
    refresher: Option<TokenRefresher>,
}

impl TokenAuthStrategy {
    /// Create a strategy reading the credential from `read`.
    #[must_use]
    pub fn new(read: impl Fn() -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            read: Arc::new(read),
            write: None,
            refresher: None,
        }
    }

    /// Strategy backed by an in-process slot, with reader and writer wired.
    #[must_use]
    pub fn in_memory(initial: Option<String>) -> Self {
        let slot = Arc::new(RwLock::new(initial));
        let reader = Arc::clone(&slot);
        Self::new(move || reader.read().unwrap_or_else(PoisonError::into_inner).clone()).with_writer(
            move |token| {
                *slot.write().unwrap_or_else(PoisonError::into_inner) = token;
            },
        )
    }

    /// Builder: Set the credential writer
    #[must_use]
    pub fn with_writer(mut self, write: impl Fn(Option<String>) + Send + Sync + 'static) -> Self {
        self.write = Some(Arc::new(write));
        self
    }

    /// Builder: Set the refresher, enabling invalidation on `401`
    #[must_use]
    pub fn with_refresher<F, Fut>(mut self, refresh: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ApiError>> + Send + 'static,
    {
        self.refresher = Some(Arc::new(
            move || -> Pin<Box<dyn Future<Output = Result<String, ApiError>> + Send>> { Box::pin(refresh()) },
        ));
        self
    }

    /// Current credential, as seen by the reader.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        (self.read)()
    }

    /// Persist a credential through the writer. No-op without a writer.
    pub fn store_token(&self, token: Option<String>) {
        match &self.write {
            Some(write) => write(token),
            None => tracing::debug!("No credential writer configured, token not stored"),
        }
    }
}

impl AuthStrategy for TokenAuthStrategy {
    fn apply_auth(&self, headers: &mut HeaderMap) {
        let Some(token) = self.token().filter(|t| !t.is_empty()) else {
            return;
        };
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            },
            Err(_) => tracing::warn!("Credential is not a valid header value, sending without it"),
        }
    }

    fn should_invalidate(&self, response: &HttpResponse) -> bool {
        self.refresher.is_some() && response.status == StatusCode::UNAUTHORIZED
    }

    fn refresh_token(&self) -> RefreshFuture<'_> {
        Box::pin(async move {
            let Some(refresher) = &self.refresher else {
                return Ok(());
            };
            let token = refresher().await?;
            self.store_token(Some(token));
            tracing::info!("Credential refreshed");
            Ok(())
        })
    }
}

impl std::fmt::Debug for TokenAuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthStrategy")
            .field("has_writer", &self.write.is_some())
            .field("has_refresher", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}
