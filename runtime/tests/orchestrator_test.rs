//! Integration tests for the request orchestrator
//!
//! Drives `ObservableRequestService` end to end over a scripted fetch:
//! emitted states, deduplication, replay, lazy execution, refetch and
//! failure handling.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use futures::{FutureExt, StreamExt};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use observable_request_core::error::ApiErrorKind;
use observable_request_core::transport::FormData;
use observable_request_core::{ApiState, DeepEquality, RequestState};
use observable_request_runtime::{
    ApiRequest, ApiRequestHandle, CacheController, ExecutionOptions, ObservableRequestService, RequestOptions,
};
use observable_request_testing::{Gate, ManualClock, MockFetch, Reply, ScriptedAuth, init_test_tracing, test_clock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

fn service(fetch: &MockFetch, base_url: &str) -> ObservableRequestService {
    service_with_clock(fetch, base_url, &test_clock())
}

fn service_with_clock(fetch: &MockFetch, base_url: &str, clock: &ManualClock) -> ObservableRequestService {
    init_test_tracing();
    let transport = Arc::new(ApiRequest::new(Arc::new(fetch.clone()), Arc::new(ScriptedAuth::new())));
    let cache = Arc::new(
        CacheController::new(Duration::from_millis(100))
            .with_comparator(DeepEquality)
            .with_clock(Arc::new(clock.clone())),
    );
    ObservableRequestService::with_settings(transport, cache, base_url)
}

fn user() -> serde_json::Value {
    json!({ "id": 1, "name": "Test" })
}

/// Wait for the first settled state on the handle's stream.
async fn settled(handle: &ApiRequestHandle) -> ApiState {
    let mut states = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(state) = states.next().await {
            if state.completed && !state.loading {
                return state;
            }
        }
        panic!("state stream ended before settling")
    })
    .await
    .expect("request did not settle in time")
}

// ============================================================================
// Emitted states
// ============================================================================

#[tokio::test]
async fn test_emits_in_progress_then_success() {
    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    assert_eq!(handle.key(), "GET//test");

    let mut states = handle.subscribe();

    let first = states.next().await.unwrap();
    assert_eq!(first, RequestState::in_progress());

    let second = states.next().await.unwrap();
    assert_eq!(second, RequestState::succeeded(user()));
    assert!(second.error.is_none());
}

#[tokio::test]
async fn test_fetches_base_url_plus_query() {
    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let service = service(&fetch, "https://test.com");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    settled(&handle).await;

    assert_eq!(fetch.last_call().unwrap().url, "https://test.com/test");
    assert_eq!(handle.key(), "GET/https://test.com/test");
}

#[tokio::test]
async fn test_typed_view_of_payload() {
    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct User {
        id: u32,
        name: String,
    }

    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    let state = settled(&handle).await;

    let user: Option<User> = state.decode().unwrap();
    assert_eq!(
        user,
        Some(User {
            id: 1,
            name: "Test".to_string()
        })
    );
}

// ============================================================================
// Deduplication and replay
// ============================================================================

#[tokio::test]
async fn test_concurrent_requests_for_same_key_share_one_call() {
    let gate = Gate::new();
    let fetch = MockFetch::new().always(Reply::json(200, user()).gated(&gate));
    let service = service(&fetch, "");

    let first = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    let second = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    assert!(service.is_pending(first.key()));
    assert!(Arc::ptr_eq(first.subject(), second.subject()));

    gate.open();
    let a = settled(&first).await;
    let b = settled(&second).await;

    assert_eq!(fetch.call_count(), 1);
    assert_eq!(a, b);
    assert!(!service.is_pending(first.key()));
}

#[tokio::test]
async fn test_different_keys_each_call() {
    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let service = service(&fetch, "");

    let a = service.create_api_request("a", RequestOptions::new(), ExecutionOptions::eager());
    let b = service.create_api_request(
        "a",
        RequestOptions::new().with_method(Method::POST),
        ExecutionOptions::eager(),
    );
    settled(&a).await;
    settled(&b).await;

    assert_eq!(fetch.call_count(), 2);
}

#[tokio::test]
async fn test_late_subscriber_gets_terminal_state_without_new_call() {
    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    settled(&handle).await;

    let late = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    let replayed = late.subscribe().next().await.unwrap();

    assert_eq!(replayed, RequestState::succeeded(user()));
    assert_eq!(fetch.call_count(), 1);
}

#[tokio::test]
async fn test_expired_entry_triggers_new_call() {
    let clock = test_clock();
    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let service = service_with_clock(&fetch, "", &clock);

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    settled(&handle).await;

    clock.advance(Duration::from_millis(99));
    let _fresh = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    assert_eq!(fetch.call_count(), 1);

    clock.advance(Duration::from_millis(1));
    let stale = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    settled(&stale).await;
    assert_eq!(fetch.call_count(), 2);
}

#[tokio::test]
async fn test_per_request_cache_ttl() {
    let clock = test_clock();
    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let service = service_with_clock(&fetch, "", &clock);
    let options = RequestOptions::new().with_cache_ttl(Duration::from_secs(10));

    let handle = service.create_api_request("test", options.clone(), ExecutionOptions::eager());
    settled(&handle).await;

    clock.advance(Duration::from_secs(5));
    let _again = service.create_api_request("test", options, ExecutionOptions::eager());
    assert_eq!(fetch.call_count(), 1);
}

// ============================================================================
// Lazy execution and refetch
// ============================================================================

#[tokio::test]
async fn test_lazy_request_waits_for_execute() {
    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::lazy());
    tokio::task::yield_now().await;
    assert_eq!(fetch.call_count(), 0);
    assert!(handle.latest().is_none());

    let executor = handle.executor().expect("lazy request has an executor");
    assert!(executor.execute());
    settled(&handle).await;

    assert_eq!(fetch.call_count(), 1);
}

#[tokio::test]
async fn test_lazy_execute_skips_pending_and_fresh_keys() {
    let gate = Gate::new();
    let fetch = MockFetch::new().always(Reply::json(200, user()).gated(&gate));
    let service = service(&fetch, "");

    let eager = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    let lazy = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::lazy());
    let executor = lazy.executor().expect("lazy request has an executor");

    assert!(service.is_pending(eager.key()));
    assert!(!executor.execute());
    assert_eq!(fetch.call_count(), 1);

    gate.open();
    settled(&eager).await;
    assert!(!service.is_pending(eager.key()));

    assert!(!executor.execute());
    tokio::task::yield_now().await;
    assert_eq!(fetch.call_count(), 1);
    assert_eq!(lazy.latest(), Some(RequestState::succeeded(user())));
}

#[tokio::test]
async fn test_eager_request_has_no_executor() {
    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::default());
    assert!(handle.executor().is_none());
}

#[tokio::test]
async fn test_refetch_bypasses_fresh_cache() {
    let fetch = MockFetch::new()
        .then(Reply::json(200, json!({ "version": 1 })))
        .always(Reply::json(200, json!({ "version": 2 })));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    settled(&handle).await;

    let refetched = handle.refetch();
    let mut states = refetched.subscribe();

    let refetching = states.next().await.unwrap();
    assert!(refetching.loading);
    assert_eq!(refetching.data(), Some(&json!({ "version": 1 })));

    let done = states.next().await.unwrap();
    assert_eq!(done.data(), Some(&json!({ "version": 2 })));
    assert_eq!(fetch.call_count(), 2);
}

#[tokio::test]
async fn test_refetch_is_deduplicated_while_in_flight() {
    let gate = Gate::new();
    let fetch = MockFetch::new().always(Reply::json(200, user()).gated(&gate));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    let _refetched = handle.refetch();

    gate.open();
    settled(&handle).await;
    assert_eq!(fetch.call_count(), 1);
}

#[tokio::test]
async fn test_attached_subscriber_sees_every_state_of_repeated_calls() {
    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::lazy());
    let mut attached = handle.subscribe();

    handle.executor().unwrap().execute();
    settled(&handle).await;
    for _ in 0..10 {
        let refetched = handle.refetch();
        settled(&refetched).await;
    }
    assert_eq!(fetch.call_count(), 11);

    for call in 0..11 {
        let started = attached.next().await.unwrap();
        assert!(started.loading, "call {call} in-progress state");
        let finished = attached.next().await.unwrap();
        assert_eq!(finished, RequestState::succeeded(user()), "call {call} terminal state");
    }
    assert!(attached.next().now_or_never().is_none());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_http_failure_settles_with_error() {
    let fetch = MockFetch::new().always(Reply::json(500, json!({ "message": "Internal failure" })));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    let state = settled(&handle).await;

    let error = state.error().unwrap();
    assert_eq!(error.kind, ApiErrorKind::Http);
    assert_eq!(error.status, Some(500));
    assert_eq!(error.message, "Internal failure");
    assert!(state.called && state.completed && !state.loading);
    assert!(!service.is_pending(handle.key()));
}

#[tokio::test]
async fn test_failed_refetch_keeps_previous_data() {
    let fetch = MockFetch::new()
        .then(Reply::json(200, user()))
        .always(Reply::status(503));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    settled(&handle).await;

    let refetched = handle.refetch();
    let state = settled(&refetched).await;

    assert_eq!(state.data(), Some(&user()));
    assert_eq!(state.error().and_then(|e| e.status), Some(503));
}

#[tokio::test]
async fn test_success_after_failure_clears_error() {
    let fetch = MockFetch::new()
        .then(Reply::status(500))
        .always(Reply::json(200, user()));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    assert!(settled(&handle).await.error.is_some());

    let state = settled(&handle.refetch()).await;
    assert!(state.error.is_none());
    assert_eq!(state.data(), Some(&user()));
}

#[tokio::test]
async fn test_timeout_settles_with_408() {
    let fetch = MockFetch::new().always(Reply::Pending);
    let service = service(&fetch, "");

    let options = RequestOptions::new().with_timeout(Duration::from_millis(20));
    let handle = service.create_api_request("slow", options, ExecutionOptions::eager());
    let state = settled(&handle).await;

    let error = state.error().unwrap();
    assert!(error.is_timeout());
    assert_eq!(error.status, Some(408));
}

#[tokio::test]
async fn test_panicking_fetch_settles_with_unknown_error() {
    let fetch = MockFetch::new().then(Reply::Panic).always(Reply::json(200, user()));
    let service = service(&fetch, "");

    let handle = service.create_api_request("test", RequestOptions::new(), ExecutionOptions::eager());
    let state = settled(&handle).await;

    assert_eq!(state.error().map(|e| e.kind), Some(ApiErrorKind::Unknown));
    assert!(!service.is_pending(handle.key()));

    let state = settled(&handle.refetch()).await;
    assert_eq!(state.data(), Some(&user()));
}

// ============================================================================
// Request bodies
// ============================================================================

#[tokio::test]
async fn test_form_data_post_sends_no_content_type() {
    let fetch = MockFetch::new().always(Reply::json(201, json!({ "uploaded": true })));
    let service = service(&fetch, "");

    let form = FormData::new().text("title", "avatar").file("file", "a.png", None, vec![1_u8, 2, 3]);
    let options = RequestOptions::new()
        .with_method(Method::POST)
        .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .with_body(form);

    let handle = service.create_api_request("test", options, ExecutionOptions::eager());
    assert_eq!(handle.key(), "POST//test");
    settled(&handle).await;

    let call = fetch.last_call().unwrap();
    assert_eq!(call.method, Method::POST);
    assert!(call.headers.get(CONTENT_TYPE).is_none());
    assert!(call.body.is_multipart());
}

// ============================================================================
// Configuration wiring
// ============================================================================

#[tokio::test]
async fn test_from_config_wires_transport_and_cache() {
    use observable_request_runtime::config::ServiceConfig;

    let fetch = MockFetch::new().always(Reply::json(200, user()));
    let config = ServiceConfig::default().with_base_url("https://api.example.com");
    let service =
        ObservableRequestService::from_config(&config, Arc::new(fetch.clone()), Arc::new(ScriptedAuth::new()))
            .unwrap();

    let handle = service.create_api_request("users", RequestOptions::new(), ExecutionOptions::eager());
    settled(&handle).await;

    let call = fetch.last_call().unwrap();
    assert_eq!(call.url, "https://api.example.com/users");
    assert_eq!(call.headers["authorization"], "Bearer token-0");
    assert!(service.cache().has(handle.key()));
}

#[tokio::test]
async fn test_from_config_rejects_invalid_config() {
    use observable_request_runtime::config::ServiceConfig;

    let config = ServiceConfig::default().with_base_url("api.example.com");
    let result = ObservableRequestService::from_config(
        &config,
        Arc::new(MockFetch::new()),
        Arc::new(ScriptedAuth::new()),
    );
    assert!(result.is_err());
}

// ============================================================================
// Multi-threaded deduplication
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_callers_share_one_call() {
    let gate = Gate::new();
    let fetch = MockFetch::new().always(Reply::json(200, user()).gated(&gate));
    let service = service(&fetch, "");

    let callers: Vec<_> = (0..16)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service.create_api_request("shared", RequestOptions::new(), ExecutionOptions::eager())
            })
        })
        .collect();

    let mut handles = Vec::new();
    for caller in callers {
        handles.push(caller.await.unwrap());
    }

    gate.open();
    for handle in &handles {
        assert_eq!(settled(handle).await, RequestState::succeeded(user()));
    }
    assert_eq!(fetch.call_count(), 1);
}
