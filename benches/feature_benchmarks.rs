//! Criterion benchmarks: match building, one tree fit, DFS transform.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use relfeat::aggregations::AggregationKind;
use relfeat::containers::{Column, DataFrame, MatchMaker};
use relfeat::dfs::DeepFeatureSynthesis;
use relfeat::trees::Ensemble;
use relfeat::Hyperparameters;

/// Synthetic star schema: `n` population rows, ~4 peripheral rows each.
fn tables(n: usize) -> (DataFrame, DataFrame) {
    let mut population = DataFrame::new("population");
    population
        .push_join_key(Column::new("jk", (0..n as i64).collect()))
        .expect("push");
    population
        .push_time_stamp(Column::new("ts", vec![1e6; n]))
        .expect("push");
    let y: Vec<f64> = (0..n).map(|i| ((i * 13) % 7) as f64).collect();
    population.push_target(Column::new("y", y)).expect("push");

    let m = n * 4;
    let mut peripheral = DataFrame::new("events");
    peripheral
        .push_join_key(Column::new("jk", (0..m).map(|i| (i / 4) as i64).collect()))
        .expect("push");
    peripheral
        .push_time_stamp(Column::new("ts", (0..m).map(|i| (i % 100) as f64).collect()))
        .expect("push");
    peripheral
        .push_numerical(Column::new("x", (0..m).map(|i| ((i * 31) % 101) as f64).collect()))
        .expect("push");
    peripheral
        .push_categorical(Column::new("cat", (0..m).map(|i| (i % 8) as i64).collect()))
        .expect("push");
    (population, peripheral)
}

fn bench_match_maker(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_maker");
    for n in [1_000, 10_000] {
        let (population, peripheral) = tables(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| MatchMaker::make_matches(&population, &peripheral, true).expect("matches"));
        });
    }
    group.finish();
}

fn bench_tree_fit(c: &mut Criterion) {
    let (population, peripheral) = tables(2_000);
    let peripherals = vec![peripheral];
    let hyp = Hyperparameters {
        num_features: 1,
        max_depth: 3,
        ..Hyperparameters::default()
    };

    c.bench_function("fit_one_tree", |b| {
        b.iter(|| {
            Ensemble::fit(&population, &peripherals, &[(0, AggregationKind::Avg)], &hyp)
                .expect("fit")
        });
    });
}

fn bench_dfs_transform(c: &mut Criterion) {
    let (population, peripheral) = tables(2_000);
    let peripherals = vec![peripheral];
    let mut dfs = DeepFeatureSynthesis::new(Hyperparameters::default());
    dfs.fit(&population, &peripherals).expect("fit");

    c.bench_function("dfs_transform", |b| {
        b.iter(|| dfs.transform(&population, &peripherals).expect("transform"));
    });
}

criterion_group!(benches, bench_match_maker, bench_tree_fit, bench_dfs_transform);
criterion_main!(benches);
