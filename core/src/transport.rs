//! HTTP value types and the transport seams.
//!
//! Two traits split the transport in layers:
//!
//! - [`Fetch`] performs exactly one HTTP call. It knows nothing about
//!   timeouts, authentication or error normalization.
//! - [`HttpRequestService`] is the full transport contract used by the
//!   orchestrator: one logical call, with auth applied, bounded by a timeout,
//!   returning a decoded payload or a normalized [`ApiError`].
//!
//! Both traits return explicit `Pin<Box<dyn Future>>` so they can be used as
//! trait objects (`Arc<dyn Fetch>`).

use crate::error::{ApiError, FetchError};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, header::CONTENT_TYPE};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default transport timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Boxed future returned by [`Fetch::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, FetchError>> + Send + 'a>>;

/// Boxed future returned by [`HttpRequestService::call`].
pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<serde_json::Value, ApiError>> + Send + 'a>>;

/// One part of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    /// A plain text field
    Text(String),
    /// A file upload
    File {
        /// File name reported to the server
        file_name: String,
        /// Optional MIME type of the file
        content_type: Option<String>,
        /// Raw file contents
        content: Bytes,
    },
}

/// A multipart form payload.
///
/// The boundary is chosen by the [`Fetch`] implementation, which is why the
/// transport strips any caller-supplied `Content-Type` for this body kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    parts: Vec<(String, FormPart)>,
}

impl FormData {
    /// Create an empty form
    #[must_use]
    pub const fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Builder: Append a text field
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push((name.into(), FormPart::Text(value.into())));
        self
    }

    /// Builder: Append a file field
    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        self.parts.push((
            name.into(),
            FormPart::File {
                file_name: file_name.into(),
                content_type,
                content: content.into(),
            },
        ));
        self
    }

    /// Fields in insertion order
    #[must_use]
    pub fn parts(&self) -> &[(String, FormPart)] {
        &self.parts
    }

    /// Check if the form has no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Body of an outgoing request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// UTF-8 text, sent as given
    Text(String),
    /// Raw bytes, sent as given
    Bytes(Bytes),
    /// JSON value; gets `Content-Type: application/json` unless one is set
    Json(serde_json::Value),
    /// Multipart form; any `Content-Type` header is removed before sending
    Multipart(FormData),
}

impl RequestBody {
    /// Check if this is a multipart form payload
    #[must_use]
    pub const fn is_multipart(&self) -> bool {
        matches!(self, Self::Multipart(_))
    }
}

impl From<FormData> for RequestBody {
    fn from(form: FormData) -> Self {
        Self::Multipart(form)
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// A fully prepared request handed to [`Fetch`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute or base-relative URL
    pub url: String,
    /// Headers after auth has been applied
    pub headers: HeaderMap,
    /// Request body
    pub body: RequestBody,
}

/// A response returned by [`Fetch`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw body
    pub body: Bytes,
}

impl HttpResponse {
    /// Create a response with no headers
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// A response with a JSON body and matching content type.
    #[must_use]
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status, value.to_string());
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    /// A response with a plain text body.
    #[must_use]
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        let mut response = Self::new(status, text.into());
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response
    }

    /// Builder: Insert a header
    #[must_use]
    pub fn with_header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check for a 2xx status
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the body is not valid JSON.
    pub fn parse_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Read the body as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns the UTF-8 error when the body is not valid text.
    pub fn parse_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }
}

/// Per-call transport options.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// HTTP method (default GET)
    pub method: Method,
    /// Extra headers, applied before auth
    pub headers: HeaderMap,
    /// Request body
    pub body: RequestBody,
    /// Abort the call after this long (default 10s)
    pub timeout: Duration,
    /// Allow one credential refresh and retry (default true)
    pub try_refresh_token: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: DEFAULT_TIMEOUT,
            try_refresh_token: true,
        }
    }
}

impl CallOptions {
    /// Options for a GET with all defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: Set the method
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Builder: Insert a header
    #[must_use]
    pub fn with_header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Builder: Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder: Set the timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder: Enable or disable the refresh-and-retry step
    #[must_use]
    pub const fn with_try_refresh_token(mut self, enabled: bool) -> Self {
        self.try_refresh_token = enabled;
        self
    }
}

/// Perform one HTTP call.
///
/// Implementations must not retry, time out or inspect status codes; all of
/// that belongs to the [`HttpRequestService`] above them. Dropping the
/// returned future must abort the call.
pub trait Fetch: Send + Sync {
    /// Issue `request` and resolve with the raw response.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`]: the call could not be completed
    /// - [`FetchError::Other`]: any other failure inside the implementation
    fn fetch(&self, request: HttpRequest) -> FetchFuture<'_>;
}

/// The transport contract used by the orchestrator.
pub trait HttpRequestService: Send + Sync {
    /// Perform one logical call to `url`.
    ///
    /// Successful bodies are returned as JSON when they parse, otherwise as a
    /// JSON string holding the raw text.
    ///
    /// # Errors
    ///
    /// Always an [`ApiError`]; see [`ApiErrorKind`](crate::error::ApiErrorKind)
    /// for the taxonomy.
    fn call(&self, url: &str, options: CallOptions) -> CallFuture<'_>;
}

/// Typed convenience over [`HttpRequestService::call`].
///
/// # Errors
///
/// Returns the transport error, or an invalid-response error when the payload
/// does not decode into `T`.
pub async fn call_as<T, S>(service: &S, url: &str, options: CallOptions) -> Result<T, ApiError>
where
    T: DeserializeOwned,
    S: HttpRequestService + ?Sized,
{
    let value = service.call(url, options).await?;
    serde_json::from_value(value).map_err(|err| {
        ApiError::invalid_response(StatusCode::OK.as_u16())
            .with_details(serde_json::Value::String(err.to_string()))
    })
}
