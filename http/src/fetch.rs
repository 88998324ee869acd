//! [`Fetch`] over a shared [`reqwest::Client`].

use bytes::Bytes;
use observable_request_core::error::FetchError;
use observable_request_core::transport::{
    Fetch, FetchFuture, FormData, FormPart, HttpRequest, HttpResponse, RequestBody,
};
use reqwest::Client;
use reqwest::multipart::{Form, Part};

/// Sends [`HttpRequest`]s with `reqwest`.
///
/// Connection failures (connect, timeout, broken request or body stream)
/// become [`FetchError::Network`]. Anything else, such as an invalid URL or
/// a malformed multipart MIME type, becomes [`FetchError::Other`]. Non-2xx
/// statuses are not errors here: they are returned as responses for the
/// transport to classify.
///
/// Cloning is cheap and shares the connection pool.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetch {
    client: Client,
}

impl ReqwestFetch {
    /// Create a fetch with a default client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetch over a preconfigured client (proxies, TLS roots, user agent)
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let builder = self.client.request(method.clone(), url.as_str()).headers(headers);
        let builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Text(text) => builder.body(text),
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Json(value) => builder.body(value.to_string()),
            RequestBody::Multipart(form) => builder.multipart(to_form(&form)?),
        };

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body: Bytes = response.bytes().await.map_err(classify)?;

        tracing::trace!(%method, url, status = status.as_u16(), bytes = body.len(), "Fetched");
        Ok(HttpResponse { status, headers, body })
    }
}

impl Fetch for ReqwestFetch {
    fn fetch(&self, request: HttpRequest) -> FetchFuture<'_> {
        Box::pin(self.send(request))
    }
}

fn to_form(data: &FormData) -> Result<Form, FetchError> {
    let mut form = Form::new();
    for (name, part) in data.parts() {
        form = match part {
            FormPart::Text(text) => form.text(name.clone(), text.clone()),
            FormPart::File {
                file_name,
                content_type,
                content,
            } => {
                let mut file = Part::bytes(content.to_vec()).file_name(file_name.clone());
                if let Some(mime) = content_type {
                    file = file
                        .mime_str(mime)
                        .map_err(|e| FetchError::Other(format!("invalid MIME type {mime:?}: {e}")))?;
                }
                form.part(name.clone(), file)
            },
        };
    }
    Ok(form)
}

fn classify(error: reqwest::Error) -> FetchError {
    if error.is_connect() || error.is_timeout() || error.is_request() || error.is_body() {
        FetchError::Network(error.to_string())
    } else {
        FetchError::Other(error.to_string())
    }
}
