//! Record collection benchmarks
//!
//! Measures the in-memory operations over eager records (no disk access):
//! grouping, stable sorting, columnwise aggregation and predicate evaluation.
//!
//! Run with: cargo bench --bench collection_ops

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use runlog::collection::aggregations;
use runlog::{DefaultParser, QueryParser, Record, RecordSet, Value};

const SMALL_SIZE: usize = 1_000; // 1K runs
const MEDIUM_SIZE: usize = 10_000; // 10K runs

/// Synthetic runs: 8 learning rates, 16 seeds, a 20-step loss curve each
fn make_runs(n: usize) -> RecordSet {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| {
            let lr = f64::from(rng.gen_range(1..=8_i32)) / 10.0;
            let curve: Vec<f64> = (0..20).map(|_| rng.gen_range(0.0..2.0)).collect();
            Record::new([
                ("config.optimizer.lr", Value::Float(lr)),
                ("config.seed", Value::Int(rng.gen_range(0..16))),
                ("info.status", Value::from("COMPLETE")),
                ("train.loss", Value::from(curve)),
            ])
        })
        .collect()
}

/// Benchmark groupby on one and two keys
fn bench_groupby(c: &mut Criterion) {
    let mut group = c.benchmark_group("groupby");

    for size in [SMALL_SIZE, MEDIUM_SIZE] {
        let runs = make_runs(size);
        group.bench_with_input(BenchmarkId::new("one_key", size), &runs, |b, runs| {
            b.iter(|| black_box(runs).groupby(&["config.optimizer.lr"]));
        });
        group.bench_with_input(BenchmarkId::new("two_keys", size), &runs, |b, runs| {
            b.iter(|| black_box(runs).groupby(&["config.optimizer.lr", "config.seed"]));
        });
    }

    group.finish();
}

/// Benchmark stable sort (many ties)
fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort");

    let runs = make_runs(MEDIUM_SIZE);
    group.bench_with_input(BenchmarkId::new("ascending", MEDIUM_SIZE), &runs, |b, runs| {
        b.iter(|| black_box(runs).sort(&["config.seed"], true));
    });
    group.bench_with_input(BenchmarkId::new("descending", MEDIUM_SIZE), &runs, |b, runs| {
        b.iter(|| black_box(runs).sort(&["config.seed"], false));
    });

    group.finish();
}

/// Benchmark per-group aggregation of loss curves
fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for size in [SMALL_SIZE, MEDIUM_SIZE] {
        let grouped = make_runs(size)
            .groupby(&["config.optimizer.lr"])
            .expect("lr is a column");
        group.bench_with_input(BenchmarkId::new("avg_std", size), &grouped, |b, grouped| {
            b.iter(|| black_box(grouped).aggregate(&[aggregations::avg_std("train.loss")]));
        });
    }

    group.finish();
}

/// Benchmark query parsing and predicate evaluation
fn bench_predicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("predicate");
    let query = "info.status == 'COMPLETE' & (config.optimizer.lr >= 0.3 | config.seed in [1, 2, 3])";

    group.bench_function("parse", |b| {
        let parser = DefaultParser::new();
        b.iter(|| parser.parse(black_box(query)));
    });

    let predicate = DefaultParser::new().parse(query).expect("valid query");
    let docs: Vec<BTreeMap<String, Value>> = make_runs(MEDIUM_SIZE).flattened();
    group.bench_with_input(BenchmarkId::new("matches", MEDIUM_SIZE), &docs, |b, docs| {
        b.iter(|| docs.iter().filter(|doc| predicate.matches(black_box(doc))).count());
    });

    group.finish();
}

criterion_group!(benches, bench_groupby, bench_sort, bench_aggregate, bench_predicate);
criterion_main!(benches);
