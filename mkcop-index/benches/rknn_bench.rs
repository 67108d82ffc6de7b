//! Build and reverse kNN query benchmarks

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mkcop_index::{MkCoPTree, TreeSettings, VectorMetric, VectorRelation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

const K_MAX: usize = 10;

fn generate_relation(size: usize) -> VectorRelation {
    let mut rng = StdRng::seed_from_u64(42);
    let points = (0..size)
        .map(|_| (0..4).map(|_| rng.gen_range(0.0..1000.0)).collect())
        .collect();
    VectorRelation::from_points(points, VectorMetric::Euclidean)
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("MkCoP/Build");
    group.sample_size(10);

    for size in [1_000, 5_000].iter() {
        let relation = generate_relation(*size);
        let ids = relation.ids();

        group.bench_with_input(BenchmarkId::new("inmemory", size), &ids, |b, ids| {
            b.iter_with_setup(
                || MkCoPTree::in_memory(TreeSettings::new(K_MAX), relation.clone()).unwrap(),
                |mut tree| {
                    tree.insert(ids).unwrap();
                    black_box(tree.height())
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("disk", size), &ids, |b, ids| {
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let tree = MkCoPTree::create(
                        dir.path().join("bench.mkcop"),
                        TreeSettings::new(K_MAX).cache_pages(64),
                        relation.clone(),
                    )
                    .unwrap();
                    (dir, tree)
                },
                |(dir, mut tree)| {
                    tree.insert(ids).unwrap();
                    tree.close().unwrap();
                    black_box(dir)
                },
            );
        });
    }

    group.finish();
}

fn bench_reverse_knn(c: &mut Criterion) {
    let mut group = c.benchmark_group("MkCoP/Reverse kNN");

    for size in [1_000, 10_000].iter() {
        let relation = generate_relation(*size);
        let ids = relation.ids();
        let mut tree = MkCoPTree::in_memory(TreeSettings::new(K_MAX), relation).unwrap();
        tree.insert(&ids).unwrap();

        for k in [1, 5, K_MAX] {
            group.bench_with_input(
                BenchmarkId::new(format!("k={}", k), size),
                &k,
                |b, &k| {
                    let mut q = 0u64;
                    b.iter(|| {
                        q = (q + 7919) % *size as u64;
                        black_box(tree.reverse_knn_query(q, k).unwrap())
                    });
                },
            );
        }

        let stats = tree.statistics();
        log::info!(
            "{} objects: {} results, {} true hits, {} candidates",
            size,
            stats.no_results,
            stats.no_true_hits,
            stats.no_candidates
        );
    }

    group.finish();
}

fn bench_knn(c: &mut Criterion) {
    let mut group = c.benchmark_group("MkCoP/kNN");
    let relation = generate_relation(10_000);
    let ids = relation.ids();
    let mut tree = MkCoPTree::in_memory(TreeSettings::new(K_MAX), relation).unwrap();
    tree.insert(&ids).unwrap();

    for k in [1, 10, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| {
            let mut q = 0u64;
            b.iter(|| {
                q = (q + 7919) % 10_000;
                black_box(tree.knn_query(q, k).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_reverse_knn, bench_knn);
criterion_main!(benches);
