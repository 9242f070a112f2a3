//! Benchmarks for the hot paths that run on every scheduler tick: interval
//! parsing/epoch alignment, `FieldValue` decoding from JSON, and dependency
//! cycle detection across a realistic fleet size.

use chomp_core::model::{FieldValue, IngesterDef, IngesterType, detect_dependency_cycle};
use chomp_core::{interval, model::FieldDef};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

fn bench_interval_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("interval_parse");
    for spec in ["s1", "m5", "h1", "d1", "w1", "3600"] {
        group.bench_with_input(BenchmarkId::new("parse", spec), spec, |b, spec| {
            b.iter(|| black_box(interval::parse(black_box(spec)).unwrap()));
        });
    }
    group.finish();
}

fn bench_next_tick(c: &mut Criterion) {
    c.bench_function("next_tick_s5", |b| {
        b.iter(|| black_box(interval::next_tick(black_box("s5"), black_box(1_700_000_000)).unwrap()));
    });
}

fn bench_field_value_from_json(c: &mut Criterion) {
    let sample = json!({
        "price": 42.5,
        "symbol": "ETH/USD",
        "raw": [1, 2, 3],
        "meta": {"nested": true, "depth": 2},
    });

    c.bench_function("field_value_from_json", |b| {
        b.iter(|| {
            let value: FieldValue = black_box(sample.clone()).into();
            black_box(value);
        });
    });
}

fn sample_fleet(n: usize) -> Vec<IngesterDef> {
    (0..n)
        .map(|i| IngesterDef {
            name: format!("ingester-{i}"),
            ingester_type: IngesterType::HttpApi,
            interval: "s5".to_string(),
            fields: vec![FieldDef {
                name: "value".to_string(),
                field_type: chomp_core::model::FieldType::Numeric,
                target: format!("metric_{i}"),
                // Every ingester but the first depends on its predecessor,
                // giving `detect_dependency_cycle` a realistic linear chain
                // to walk rather than a trivially empty graph.
                selector: if i == 0 {
                    "$.value".to_string()
                } else {
                    format!("ingester-{}.value", i - 1)
                },
                transformers: vec![],
            }],
            handler: None,
        })
        .collect()
}

fn bench_dependency_cycle_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect_dependency_cycle");
    for size in [10usize, 100, 500] {
        let defs = sample_fleet(size);
        group.bench_with_input(BenchmarkId::new("linear_chain", size), &defs, |b, defs| {
            b.iter(|| black_box(detect_dependency_cycle(black_box(defs))).unwrap());
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_interval_parse,
    bench_next_tick,
    bench_field_value_from_json,
    bench_dependency_cycle_detection,
);
criterion_main!(benches);
