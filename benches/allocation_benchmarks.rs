use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

use feria_api::services::allocation::{plan_fefo, BatchSnapshot};

fn shelf(lots: usize) -> Vec<BatchSnapshot> {
    let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    (0..lots)
        .map(|i| BatchSnapshot {
            batch_id: Uuid::new_v4(),
            // Interleave the dates so the planner has real sorting work to do.
            expiration_date: base + chrono::Duration::days(((i * 7) % 45) as i64),
            production_date: base - chrono::Duration::days((i % 10) as i64),
            available: 10,
        })
        .collect()
}

// Benchmark for planning across a growing shelf
fn fefo_planning_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("fefo_planning");

    for lots in [4usize, 16, 64, 256].iter() {
        let shelf = shelf(*lots);
        // Half the shelf's stock, so the plan spans many lots.
        let requested = (*lots as i32) * 5;
        group.bench_with_input(BenchmarkId::from_parameter(lots), &shelf, |b, shelf| {
            b.iter(|| {
                let plan = plan_fefo(black_box(requested), black_box(shelf));
                black_box(plan)
            });
        });
    }

    group.finish();
}

// Benchmark for the cheap path where the oldest lot covers the request
fn fefo_first_lot_benchmark(c: &mut Criterion) {
    let shelf = shelf(64);
    c.bench_function("fefo_first_lot", |b| {
        b.iter(|| {
            let plan = plan_fefo(black_box(3), black_box(&shelf));
            black_box(plan)
        });
    });
}

// Benchmark for the failure path and its availability sum
fn fefo_shortfall_benchmark(c: &mut Criterion) {
    let shelf = shelf(64);
    c.bench_function("fefo_shortfall", |b| {
        b.iter(|| {
            let plan = plan_fefo(black_box(100_000), black_box(&shelf));
            black_box(plan)
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(100);
    targets =
        fefo_planning_benchmark,
        fefo_first_lot_benchmark,
        fefo_shortfall_benchmark
}

criterion_main!(benches);
