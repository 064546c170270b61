use axum::http::{Method, StatusCode};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

use ledger_gateway::idempotency::{
    Claim, Fingerprint, IdempotencyCoordinator, RecordStore, StoreConfig, StoredResponse,
};

fn benchmark_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for fields in [1usize, 16, 256].iter() {
        let body = serde_json::to_vec(
            &(0..*fields)
                .map(|i| (format!("field_{}", i), serde_json::json!(i)))
                .collect::<serde_json::Map<_, _>>(),
        )
        .unwrap();

        group.bench_with_input(BenchmarkId::new("json_fields", fields), &body, |b, body| {
            b.iter(|| {
                Fingerprint::compute(
                    black_box(&Method::POST),
                    black_box("/accounts/1/withdraw"),
                    black_box(body),
                )
            });
        });
    }

    group.bench_function("non_json_body", |b| {
        let body = vec![b'x'; 4096];
        b.iter(|| Fingerprint::compute(&Method::POST, "/accounts/1/withdraw", black_box(&body)));
    });

    group.finish();
}

fn benchmark_record_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_store");
    let fingerprint = Fingerprint::compute(&Method::POST, "/accounts/1/withdraw", b"{}");

    group.bench_function("claim_and_complete", |b| {
        let store = RecordStore::new(StoreConfig {
            max_records: usize::MAX,
            ..StoreConfig::default()
        });
        let response = StoredResponse::json(StatusCode::OK, &"ok");
        let mut i = 0u64;

        b.iter(|| {
            i += 1;
            let key = format!("key-{}", i);
            if let Ok(Claim::Inserted(token)) =
                store.insert_if_absent(&key, &fingerprint)
            {
                store.complete(&key, token, response.clone());
            }
        });
    });

    group.bench_function("duplicate_lookup", |b| {
        let store = RecordStore::new(StoreConfig::default());
        store.insert_if_absent("hot-key", &fingerprint).unwrap();

        b.iter(|| black_box(store.insert_if_absent(black_box("hot-key"), &fingerprint)));
    });

    group.finish();
}

fn benchmark_coordinator_replay(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(RecordStore::new(StoreConfig::default()));
    let coordinator = IdempotencyCoordinator::new(store, Duration::from_secs(1));
    let fingerprint = Fingerprint::compute(&Method::POST, "/accounts/1/withdraw", b"{}");

    runtime.block_on(async {
        coordinator
            .execute("replayed", &fingerprint, || async {
                Ok::<_, StoredResponse>(StoredResponse::json(StatusCode::OK, &"ok"))
            })
            .await
            .unwrap();
    });

    c.bench_function("coordinator_replay", |b| {
        b.to_async(&runtime).iter(|| async {
            let execution = coordinator
                .execute("replayed", &fingerprint, || async {
                    Ok::<_, StoredResponse>(StoredResponse::json(StatusCode::OK, &"unreachable"))
                })
                .await;
            black_box(execution)
        });
    });
}

criterion_group!(
    benches,
    benchmark_fingerprint,
    benchmark_record_store,
    benchmark_coordinator_replay
);
criterion_main!(benches);
