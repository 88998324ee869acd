//! Authentication strategy seam.
//!
//! The transport never knows how credentials look. It asks the strategy to
//! decorate outgoing headers, to judge whether a failed response means the
//! credentials went stale, and to refresh them.

use crate::error::ApiError;
use crate::transport::HttpResponse;
use http::HeaderMap;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`AuthStrategy::refresh_token`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + 'a>>;

/// Pluggable credential policy.
///
/// # Dyn Compatibility
///
/// `refresh_token` returns an explicit `Pin<Box<dyn Future>>` so strategies
/// can be shared as `Arc<dyn AuthStrategy>`.
///
/// # Examples
///
/// ```
/// use observable_request_core::auth::{AuthStrategy, RefreshFuture};
/// use observable_request_core::transport::HttpResponse;
/// use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
///
/// struct StaticKey;
///
/// impl AuthStrategy for StaticKey {
///     fn apply_auth(&self, headers: &mut HeaderMap) {
///         headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer key"));
///     }
///
///     fn should_invalidate(&self, _response: &HttpResponse) -> bool {
///         false
///     }
///
///     fn refresh_token(&self) -> RefreshFuture<'_> {
///         Box::pin(async { Ok(()) })
///     }
/// }
///
/// let mut headers = HeaderMap::new();
/// StaticKey.apply_auth(&mut headers);
/// StaticKey.apply_auth(&mut headers);
/// assert_eq!(headers.len(), 1);
/// ```
pub trait AuthStrategy: Send + Sync {
    /// Attach credentials to outgoing headers.
    ///
    /// Must be idempotent: applying twice yields the same headers as once.
    fn apply_auth(&self, headers: &mut HeaderMap);

    /// Decide whether a failed response means credentials must be refreshed
    /// and the call retried.
    fn should_invalidate(&self, response: &HttpResponse) -> bool;

    /// Refresh credentials. Resolves once new credentials are in place.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] when the refresh itself failed. The transport
    /// surfaces it as the call's error.
    fn refresh_token(&self) -> RefreshFuture<'_>;
}
