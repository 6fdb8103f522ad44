//! Index search latency for flat and inverted-file topologies.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use kbsearch::vector::{KMeansOptions, VectorDimension, VectorIndex, normalize_vector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DIMENSION: usize = 384;

fn random_unit_vectors(count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut vector: Vec<f32> = (0..DIMENSION)
                .map(|_| rng.random_range(-1.0f32..1.0))
                .collect();
            normalize_vector(&mut vector);
            vector
        })
        .collect()
}

fn bench_flat_search(c: &mut Criterion) {
    let dimension = VectorDimension::new(DIMENSION).unwrap();
    let query = random_unit_vectors(1, 7).remove(0);
    let mut group = c.benchmark_group("flat_search");

    for count in [100, 1_000] {
        let index = VectorIndex::build_flat(dimension, &random_unit_vectors(count, 1)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(count), &index, |b, index| {
            b.iter(|| black_box(index.search(black_box(&query), 3).unwrap()));
        });
    }
    group.finish();
}

fn bench_inverted_file_search(c: &mut Criterion) {
    let dimension = VectorDimension::new(DIMENSION).unwrap();
    let query = random_unit_vectors(1, 7).remove(0);
    let vectors = random_unit_vectors(5_000, 2);
    let index =
        VectorIndex::build_inverted_file(dimension, &vectors, 70, &KMeansOptions::default())
            .unwrap();

    let mut group = c.benchmark_group("ivf_search_5000");
    for nprobe in [1, 4, 16] {
        let index = index.clone().with_nprobe(nprobe);
        group.bench_with_input(BenchmarkId::new("nprobe", nprobe), &index, |b, index| {
            b.iter(|| black_box(index.search(black_box(&query), 3).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_flat_search, bench_inverted_file_search);
criterion_main!(benches);
