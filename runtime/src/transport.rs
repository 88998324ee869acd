//! The `ApiRequest` transport.
//!
//! One logical call runs as an explicit two-step state machine:
//!
//! ```text
//! Initial ──(non-2xx, refresh allowed, strategy invalidates)──▶ refresh ──▶ AfterRefresh
//!    │                                                                       │
//!    └──────────────────────────────▶ settle ◀──────────────────────────────┘
//! ```
//!
//! `AfterRefresh` always settles, so a server that keeps rejecting
//! credentials costs exactly one refresh and one retry.

use crate::auth::PassThroughAuth;
use crate::metrics::TransportMetrics;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method};
use observable_request_core::auth::AuthStrategy;
use observable_request_core::error::ApiError;
use observable_request_core::transport::{
    CallFuture, CallOptions, Fetch, HttpRequest, HttpRequestService, HttpResponse, RequestBody,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    AfterRefresh,
}

/// HTTP transport applying auth, a timeout, and one refresh-and-retry.
#[derive(Clone)]
pub struct ApiRequest {
    fetch: Arc<dyn Fetch>,
    auth: Arc<dyn AuthStrategy>,
}

impl ApiRequest {
    /// Create a transport over `fetch` using `auth` for credentials.
    #[must_use]
    pub fn new(fetch: Arc<dyn Fetch>, auth: Arc<dyn AuthStrategy>) -> Self {
        Self { fetch, auth }
    }

    /// Create a transport that sends no credentials.
    #[must_use]
    pub fn without_auth(fetch: Arc<dyn Fetch>) -> Self {
        Self::new(fetch, Arc::new(PassThroughAuth))
    }

    async fn execute(&self, url: &str, options: CallOptions) -> Result<Value, ApiError> {
        let started = Instant::now();
        let method = options.method.clone();

        let result = self.run(url, options).await;

        TransportMetrics::record_call(started.elapsed());
        match &result {
            Ok(_) => tracing::debug!(%method, url, "Transport call succeeded"),
            Err(err) => {
                TransportMetrics::record_error(err.kind);
                tracing::info!(
                    %method,
                    url,
                    kind = %err.kind,
                    status = ?err.status,
                    error = %err,
                    "Transport call failed"
                );
            },
        }
        result
    }

    async fn run(&self, url: &str, options: CallOptions) -> Result<Value, ApiError> {
        let CallOptions {
            method,
            headers,
            body,
            timeout,
            try_refresh_token,
        } = options;

        let mut attempt = Attempt::Initial;
        loop {
            let request = self.prepare(&method, url, &headers, &body);
            let response = self.send(request, timeout).await?;

            if response.is_success() {
                return decode_success(&response);
            }

            match attempt {
                Attempt::Initial if try_refresh_token && self.auth.should_invalidate(&response) => {
                    tracing::warn!(
                        %method,
                        url,
                        status = response.status.as_u16(),
                        "Credentials invalidated, refreshing and retrying once"
                    );
                    TransportMetrics::record_refresh();
                    self.auth.refresh_token().await?;
                    attempt = Attempt::AfterRefresh;
                },
                Attempt::Initial | Attempt::AfterRefresh => return Err(http_error(&response)),
            }
        }
    }

    fn prepare(&self, method: &Method, url: &str, headers: &HeaderMap, body: &RequestBody) -> HttpRequest {
        let mut headers = headers.clone();
        self.auth.apply_auth(&mut headers);

        match body {
            RequestBody::Multipart(_) => {
                headers.remove(CONTENT_TYPE);
            },
            RequestBody::Json(_) if !headers.contains_key(CONTENT_TYPE) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            },
            _ => {},
        }

        HttpRequest {
            method: method.clone(),
            url: url.to_string(),
            headers,
            body: body.clone(),
        }
    }

    async fn send(&self, request: HttpRequest, timeout: Duration) -> Result<HttpResponse, ApiError> {
        tracing::debug!(method = %request.method, url = %request.url, "Issuing transport call");
        match tokio::time::timeout(timeout, self.fetch.fetch(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(err.into()),
            Err(_elapsed) => Err(ApiError::timeout()),
        }
    }
}

impl HttpRequestService for ApiRequest {
    fn call(&self, url: &str, options: CallOptions) -> CallFuture<'_> {
        let url = url.to_string();
        Box::pin(async move { self.execute(&url, options).await })
    }
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest").finish_non_exhaustive()
    }
}

/// JSON if it parses, the raw text otherwise.
fn decode_success(response: &HttpResponse) -> Result<Value, ApiError> {
    if let Ok(value) = response.parse_json() {
        return Ok(value);
    }
    response
        .parse_text()
        .map(|text| Value::String(text.to_string()))
        .map_err(|_| ApiError::invalid_response(response.status.as_u16()))
}

/// Build the HTTP error, reading `message`, `details` and `code` from a JSON
/// body when there is one.
fn http_error(response: &HttpResponse) -> ApiError {
    let mut error = ApiError::http(response.status.as_u16());

    let Ok(Value::Object(body)) = response.parse_json() else {
        return error;
    };
    if let Some(Value::String(message)) = body.get("message") {
        error = error.with_message(message.clone());
    }
    if let Some(details) = body.get("details").filter(|d| !d.is_null()) {
        error = error.with_details(details.clone());
    }
    if let Some(Value::String(code)) = body.get("code") {
        error = error.with_code(code.clone());
    }
    error
}
