//! Criterion benchmarks for the hot client-side paths: body encoding,
//! parameter substitution, id generation, and a full query through the
//! in-memory transport (so the numbers exclude network time).

use std::hint::black_box;
use std::sync::{Arc, LazyLock};

use clickhouse_http_middleware::encoder::{InsertValues, encode, encode_batch};
use clickhouse_http_middleware::ids::IdGenerator;
use clickhouse_http_middleware::prelude::*;
use clickhouse_http_middleware::test_utils::{StubConnector, StubTransport};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

static TOKIO_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("create tokio runtime"));

/// Rows per encode iteration; override with `BENCH_ROWS`.
fn row_count() -> usize {
    std::env::var("BENCH_ROWS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1_000)
}

fn rows(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| {
            json!({
                "id": i,
                "name": format!("user-{i}"),
                "score": i as f64 * 0.5,
                "tags": ["a", "b"],
            })
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let n = row_count();
    let items = rows(n);
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(n as u64));

    group.bench_with_input(BenchmarkId::new("batch", n), &items, |b, items| {
        b.iter(|| encode_batch(black_box(items), Format::JsonEachRow).expect("encode batch"));
    });

    group.bench_with_input(BenchmarkId::new("row_stream", n), &items, |b, items| {
        b.to_async(&*TOKIO_RUNTIME).iter(|| async {
            let values = InsertValues::rows(stream::iter(items.clone()));
            let mut body = encode(values, Format::JsonEachRow)
                .expect("encode stream")
                .into_stream();
            let mut total = 0usize;
            while let Some(chunk) = body.next().await {
                total += chunk.expect("chunk").len();
            }
            black_box(total)
        });
    });
    group.finish();
}

fn bench_format_sql(c: &mut Criterion) {
    let params = [json!(42), json!("o'neil"), json!([1, 2, 3]), json!(null)];
    let sql = "SELECT * FROM t WHERE id = ? AND name = ? AND x IN (?) AND y IS ? -- ?";
    c.bench_function("format_sql", |b| {
        b.iter(|| {
            QuestionMarkFormatter
                .format(black_box(sql), black_box(&params))
                .expect("format")
        });
    });
}

fn bench_ids(c: &mut Criterion) {
    let ids = IdGenerator::new();
    c.bench_function("next_id", |b| b.iter(|| black_box(ids.next_id())));
}

fn bench_stub_query(c: &mut Criterion) {
    let client = TOKIO_RUNTIME.block_on(async {
        let stub = StubTransport::new();
        stub.stop_recording();
        let client = Client::with_connector(
            ClientConfig::builder().pool_size(Some(8)).finish(),
            Arc::new(StubConnector::new(stub)),
        )
        .expect("client");
        client.open().await.expect("open");
        client
    });
    c.bench_function("query_via_stub", |b| {
        b.to_async(&*TOKIO_RUNTIME).iter(|| async {
            client
                .query("SELECT ?", &[json!(1)], None)
                .await
                .expect("query")
        });
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_format_sql,
    bench_ids,
    bench_stub_query
);
criterion_main!(benches);
