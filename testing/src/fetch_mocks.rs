//! Scripted fetch for transport and orchestrator tests.

#![allow(clippy::panic)] // Reply::Panic exists to exercise panic handling

use http::StatusCode;
use observable_request_core::error::FetchError;
use observable_request_core::transport::{Fetch, FetchFuture, HttpRequest, HttpResponse};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// What a [`MockFetch`] does with one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Resolve with this response
    Response(HttpResponse),
    /// Fail with this error
    Error(FetchError),
    /// Sleep, then behave like the inner reply
    Delayed(Duration, Box<Reply>),
    /// Wait until the gate opens, then behave like the inner reply
    Gated(Gate, Box<Reply>),
    /// Never resolve
    Pending,
    /// Panic inside the fetch future
    Panic,
}

impl Reply {
    /// JSON response with the given status.
    #[must_use]
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self::Response(HttpResponse::json(status_code(status), &value))
    }

    /// Plain text response with the given status.
    #[must_use]
    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self::Response(HttpResponse::text(status_code(status), text))
    }

    /// Empty-bodied response with the given status.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self::Response(HttpResponse::new(status_code(status), Vec::new()))
    }

    /// Builder: Hold this reply until `gate` opens
    #[must_use]
    pub fn gated(self, gate: &Gate) -> Self {
        Self::Gated(gate.clone(), Box::new(self))
    }

    /// Builder: Delay this reply
    #[must_use]
    pub fn delayed(self, by: Duration) -> Self {
        Self::Delayed(by, Box::new(self))
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// A latch that holds gated replies until opened.
#[derive(Debug, Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Gate {
    /// Create a closed gate
    #[must_use]
    pub fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self { open: Arc::new(open) }
    }

    /// Release every reply waiting on this gate, now and later.
    pub fn open(&self) {
        self.open.send_replace(true);
    }

    async fn wait(&self) {
        let mut rx = self.open.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<Reply>,
    fallback: Option<Reply>,
    calls: Vec<HttpRequest>,
}

/// Scripted [`Fetch`] that records every request.
///
/// Replies queued with [`then`](Self::then) are used first, in order; after
/// that every request gets the [`always`](Self::always) reply. A request with
/// nothing to reply fails with [`FetchError::Other`].
///
/// # Example
///
/// ```
/// use observable_request_testing::{MockFetch, Reply};
/// use observable_request_core::transport::{Fetch, HttpRequest, RequestBody};
/// use http::{HeaderMap, Method};
/// use serde_json::json;
///
/// let fetch = MockFetch::new()
///     .then(Reply::status(401))
///     .always(Reply::json(200, json!({ "ok": true })));
///
/// let request = HttpRequest {
///     method: Method::GET,
///     url: "/a".to_string(),
///     headers: HeaderMap::new(),
///     body: RequestBody::Empty,
/// };
/// let first = tokio_test::block_on(fetch.fetch(request.clone())).unwrap();
/// let second = tokio_test::block_on(fetch.fetch(request)).unwrap();
///
/// assert_eq!(first.status, 401);
/// assert_eq!(second.status, 200);
/// assert_eq!(fetch.call_count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockFetch {
    state: Arc<Mutex<MockState>>,
}

impl MockFetch {
    /// Create a fetch with no replies configured
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: Queue a one-shot reply
    #[must_use]
    pub fn then(self, reply: Reply) -> Self {
        self.push(reply);
        self
    }

    /// Builder: Reply used once the queue is empty
    #[must_use]
    pub fn always(self, reply: Reply) -> Self {
        self.lock().fallback = Some(reply);
        self
    }

    /// Queue a one-shot reply on a shared handle
    pub fn push(&self, reply: Reply) {
        self.lock().script.push_back(reply);
    }

    /// Every request received so far
    #[must_use]
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.lock().calls.clone()
    }

    /// Number of requests received so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// The most recent request
    #[must_use]
    pub fn last_call(&self) -> Option<HttpRequest> {
        self.lock().calls.last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, request: HttpRequest) -> Option<Reply> {
        let mut state = self.lock();
        state.calls.push(request);
        state.script.pop_front().or_else(|| state.fallback.clone())
    }
}

impl Fetch for MockFetch {
    fn fetch(&self, request: HttpRequest) -> FetchFuture<'_> {
        let reply = self.next_reply(request);
        Box::pin(async move {
            match reply {
                Some(reply) => resolve(reply).await,
                None => Err(FetchError::Other("no scripted reply".to_string())),
            }
        })
    }
}

async fn resolve(mut reply: Reply) -> Result<HttpResponse, FetchError> {
    loop {
        reply = match reply {
            Reply::Response(response) => return Ok(response),
            Reply::Error(error) => return Err(error),
            Reply::Delayed(by, inner) => {
                tokio::time::sleep(by).await;
                *inner
            },
            Reply::Gated(gate, inner) => {
                gate.wait().await;
                *inner
            },
            Reply::Pending => futures::future::pending().await,
            Reply::Panic => panic!("scripted fetch panic"),
        };
    }
}
