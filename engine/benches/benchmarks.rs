//! Performance benchmarks for flock-engine

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flock_engine::{merge, provisional_id, Record, RemoteDoc};
use serde_json::json;

fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn remote_docs(count: usize) -> Vec<RemoteDoc> {
    (0..count)
        .map(|i| RemoteDoc {
            id: format!("doc-{i}"),
            created_at: Utc.timestamp_opt(i as i64, 0).unwrap(),
            fields: object(json!({"title": format!("Event {i}"), "spots": i})),
        })
        .collect()
}

fn pending_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| Record {
            id: provisional_id(),
            pending_sync: true,
            created_at: Utc.timestamp_opt(i as i64 + 500, 0).unwrap(),
            fields: object(json!({"title": format!("Pending {i}")})),
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_snapshot");

    for size in [10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::new("remote_only", size), &size, |b, &size| {
            let remote = remote_docs(size);
            b.iter(|| merge::merge_snapshot(black_box(remote.clone()), black_box(Vec::new())))
        });

        group.bench_with_input(
            BenchmarkId::new("with_pending", size),
            &size,
            |b, &size| {
                let remote = remote_docs(size);
                let local = pending_records(size / 10 + 1);
                b.iter(|| merge::merge_snapshot(black_box(remote.clone()), black_box(local.clone())))
            },
        );
    }

    group.finish();
}

fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort_newest_first");

    for size in [10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let records: Vec<Record> = remote_docs(size)
                .into_iter()
                .map(Record::from_remote)
                .collect();
            b.iter(|| {
                let mut records = records.clone();
                merge::sort_newest_first(black_box(&mut records));
                records
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merge, bench_sort);
criterion_main!(benches);
