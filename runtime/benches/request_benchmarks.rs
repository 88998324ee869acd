//! Request layer benchmarks
//!
//! - Cache writes, with and without a comparator
//! - Cache reads of fresh entries
//! - Subject publish with live subscribers
//! - Deduplicated request creation
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use observable_request_core::{ApiState, DeepEquality, RequestState};
use observable_request_runtime::{
    ApiRequest, CacheController, ExecutionOptions, ObservableRequestService, RequestOptions, StateSubject,
};
use observable_request_testing::{Gate, MockFetch, Reply};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn payload() -> Value {
    json!({
        "id": 1,
        "name": "bench",
        "tags": ["a", "b", "c"],
        "nested": { "depth": 2, "values": [1, 2, 3, 4, 5] }
    })
}

fn benchmark_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_always_notify", |b| {
        let cache: CacheController<Value> = CacheController::new(Duration::from_secs(60));
        let state = RequestState::succeeded(payload());
        b.iter(|| cache.set(black_box("GET//bench"), state.clone(), None));
    });

    group.bench_function("set_suppressed_equal", |b| {
        let cache: CacheController<Value> =
            CacheController::new(Duration::from_secs(60)).with_comparator(DeepEquality);
        b.iter(|| cache.set(black_box("GET//bench"), RequestState::succeeded(payload()), None));
    });

    group.bench_function("get_fresh", |b| {
        let cache: CacheController<Value> = CacheController::new(Duration::from_secs(60));
        cache.set("GET//bench", RequestState::succeeded(payload()), None);
        b.iter(|| black_box(cache.get(black_box("GET//bench"))));
    });

    group.finish();
}

fn benchmark_subject(c: &mut Criterion) {
    let mut group = c.benchmark_group("subject");
    group.throughput(Throughput::Elements(1));

    for subscribers in [0_usize, 1, 8] {
        group.bench_function(format!("publish_{subscribers}_subscribers"), |b| {
            let subject: StateSubject<ApiState> = StateSubject::new();
            let _streams: Vec<_> = (0..subscribers).map(|_| subject.subscribe()).collect();
            let state = RequestState::succeeded(payload());
            b.iter(|| subject.publish(black_box(state.clone())));
        });
    }

    group.finish();
}

fn benchmark_create_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_api_request");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    group.bench_function("deduplicated_in_flight", |b| {
        let _guard = runtime.enter();
        let gate = Gate::new();
        let fetch = MockFetch::new().always(Reply::json(200, payload()).gated(&gate));
        let service = ObservableRequestService::new(
            Arc::new(ApiRequest::without_auth(Arc::new(fetch))),
            Arc::new(CacheController::new(Duration::from_secs(60))),
        );
        let _first = service.create_api_request("bench", RequestOptions::new(), ExecutionOptions::eager());

        b.iter(|| {
            black_box(service.create_api_request(
                black_box("bench"),
                RequestOptions::new(),
                ExecutionOptions::eager(),
            ))
        });
    });

    group.bench_function("cached_fresh", |b| {
        let fetch = MockFetch::new().always(Reply::json(200, payload()));
        let service = ObservableRequestService::new(
            Arc::new(ApiRequest::without_auth(Arc::new(fetch))),
            Arc::new(CacheController::new(Duration::from_secs(60))),
        );
        service
            .cache()
            .set("GET//bench", RequestState::succeeded(payload()), None);

        b.to_async(&runtime).iter(|| async {
            black_box(service.create_api_request(
                black_box("bench"),
                RequestOptions::new(),
                ExecutionOptions::eager(),
            ))
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_cache, benchmark_subject, benchmark_create_request);
criterion_main!(benches);
