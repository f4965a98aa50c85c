use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kibitz_presence::{CorrelationEngine, OpenFile, PresenceSnapshot, PresenceTable};
use std::sync::Arc;

fn typical_snapshot(participant: &str) -> PresenceSnapshot {
    PresenceSnapshot::with_files(
        participant,
        vec![
            OpenFile::with_carets("src/lib.rs", vec![101, 102, 103]),
            OpenFile::with_carets("src/table.rs", vec![201]),
            OpenFile::new("README.md"),
        ],
    )
}

fn bench_snapshot_encode(c: &mut Criterion) {
    let snapshot = typical_snapshot("alice");
    c.bench_function("snapshot_encode", |b| {
        b.iter(|| black_box(black_box(&snapshot).encode().unwrap()))
    });
}

fn bench_snapshot_decode(c: &mut Criterion) {
    let encoded = typical_snapshot("alice").encode().unwrap();
    c.bench_function("snapshot_decode", |b| {
        b.iter(|| black_box(PresenceSnapshot::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_snapshot_roundtrip(c: &mut Criterion) {
    let snapshot = typical_snapshot("alice");
    c.bench_function("snapshot_roundtrip", |b| {
        b.iter(|| {
            let encoded = snapshot.encode().unwrap();
            black_box(PresenceSnapshot::decode(&encoded).unwrap())
        })
    });
}

fn bench_table_merge(c: &mut Criterion) {
    let table = PresenceTable::new("me");
    let snapshot = typical_snapshot("alice");
    c.bench_function("table_merge", |b| {
        b.iter(|| table.merge(black_box(&snapshot)))
    });
}

fn bench_table_lookup(c: &mut Criterion) {
    let table = PresenceTable::new("me");
    for i in 0..100 {
        table.merge(&PresenceSnapshot::with_files(
            format!("peer-{i}"),
            vec![OpenFile::with_carets("f.rs", vec![i, i + 1000])],
        ));
    }
    c.bench_function("table_lookup_100_peers", |b| {
        b.iter(|| black_box(table.lookup(black_box(50))))
    });
}

fn bench_correlate(c: &mut Criterion) {
    let table = Arc::new(PresenceTable::new("me"));
    for i in 0..20 {
        table.merge(&PresenceSnapshot::with_files(
            format!("peer-{i}"),
            vec![OpenFile::with_carets("f.rs", vec![i * 3])],
        ));
    }
    let engine = CorrelationEngine::new(table);
    let nodes: Vec<(usize, i64)> = (0..200).map(|i| (i, i as i64)).collect();
    c.bench_function("correlate_200_nodes", |b| {
        b.iter(|| black_box(engine.correlate(nodes.clone())))
    });
}

criterion_group!(
    benches,
    bench_snapshot_encode,
    bench_snapshot_decode,
    bench_snapshot_roundtrip,
    bench_table_merge,
    bench_table_lookup,
    bench_correlate,
);
criterion_main!(benches);
