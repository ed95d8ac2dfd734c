// Build and query throughput of the random projection forest
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rpforest::{Forest, ForestConfig, Metric, SharedForest};
use std::sync::Arc;

fn generate_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.random_range(-1.0f32..1.0f32)).collect())
        .collect()
}

fn populated_forest(vectors: &[Vec<f32>], metric: Metric) -> Forest {
    let mut forest = Forest::with_config(ForestConfig {
        metric,
        seed: Some(42),
        ..ForestConfig::new(vectors[0].len())
    })
    .unwrap();
    for (id, v) in vectors.iter().enumerate() {
        forest.add_item(id as i64, v).unwrap();
    }
    forest
}

fn benchmark_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(10);

    for size in [1000, 10000].iter() {
        let vectors = generate_vectors(*size, 64, 1);
        group.bench_with_input(BenchmarkId::new("10_trees", size), size, |b, _| {
            b.iter_batched(
                || populated_forest(&vectors, Metric::Euclidean),
                |mut forest| {
                    forest.build(10).unwrap();
                    black_box(forest)
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn benchmark_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    let vectors = generate_vectors(10000, 128, 2);
    let queries = generate_vectors(100, 128, 3);

    for metric in [Metric::Euclidean, Metric::Angular] {
        let mut forest = populated_forest(&vectors, metric);
        forest.build(20).unwrap();

        for search_k in [200usize, 2000] {
            let id = BenchmarkId::new(metric.to_string(), search_k);
            group.bench_with_input(id, &search_k, |b, &search_k| {
                let mut i = 0;
                b.iter(|| {
                    let q = &queries[i % queries.len()];
                    i += 1;
                    black_box(forest.query(black_box(q), 10, Some(search_k)).unwrap())
                });
            });
        }
    }

    group.finish();
}

fn benchmark_concurrent_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_reads");

    let vectors = generate_vectors(10000, 64, 4);
    let shared = SharedForest::new(populated_forest(&vectors, Metric::Euclidean));
    shared.build(10).unwrap();
    let queries = Arc::new(generate_vectors(64, 64, 5));

    group.bench_function("4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let shared = shared.clone();
                    let queries = queries.clone();
                    std::thread::spawn(move || {
                        for q in queries.iter().skip(t).step_by(4) {
                            black_box(shared.query(q, 10, None).unwrap());
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_build, benchmark_search, benchmark_concurrent_reads);
criterion_main!(benches);
