//! HNSW build and query benchmarks.
//!
//! Measures parallel construction across dataset sizes and `M` values, and
//! query latency across `ef`, printing recall@k for each query setting.
use std::hint::black_box;

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};

use vectorlib_benches::{
    error::BenchSetupError,
    params::{BuildBenchParams, QueryBenchParams},
    recall::{RecallScore, brute_force_top_k, recall_at_k},
    source::{SyntheticConfig, SyntheticSource},
};
use vectorlib_core::{HnswParams, encode_f32};

/// Seed used for all synthetic data generation in this benchmark.
const SEED: u64 = 42;

/// Vector dimensionality for all benchmark datasets.
const DIMENSIONS: usize = 16;

/// Dataset sizes to benchmark.
const POINT_COUNTS: &[usize] = &[1_000, 5_000];

/// HNSW `M` values to benchmark.
const MAX_CONNECTIONS: &[usize] = &[8, 16];

/// Construction breadth shared by every build.
const EF_CONSTRUCTION: usize = 100;

/// Query breadths swept by the query benchmark.
const EF_SWEEP: &[usize] = &[10, 50, 200];

/// Neighbours requested per query.
const K: usize = 10;

fn make_source(point_count: usize, seed: u64) -> Result<SyntheticSource, BenchSetupError> {
    SyntheticSource::generate(&SyntheticConfig {
        point_count,
        dimensions: DIMENSIONS,
        seed,
    })
}

fn make_params(m: usize) -> Result<HnswParams, BenchSetupError> {
    Ok(HnswParams::new(m, EF_CONSTRUCTION)?.with_rng_seed(SEED))
}

fn hnsw_build_impl(c: &mut Criterion) -> Result<(), BenchSetupError> {
    let mut group = c.benchmark_group("hnsw_build");
    group.sample_size(10);

    for &point_count in POINT_COUNTS {
        let source = make_source(point_count, SEED)?;
        for &m in MAX_CONNECTIONS {
            let params = make_params(m)?;
            let label = BuildBenchParams {
                point_count,
                max_connections: m,
            };
            group.bench_with_input(BenchmarkId::from_parameter(&label), &params, |b, params| {
                b.iter_batched(
                    || params.clone(),
                    |params| {
                        if let Err(err) = source.build_index(params) {
                            panic!("index build failed for {label}: {err}");
                        }
                    },
                    BatchSize::SmallInput,
                );
            });
        }
    }

    group.finish();
    Ok(())
}

fn hnsw_query_impl(c: &mut Criterion) -> Result<(), BenchSetupError> {
    let source = make_source(5_000, SEED)?;
    let queries = make_source(100, SEED + 1)?;
    let index = source.build_index(make_params(16)?)?;
    let encoded: Vec<Vec<u8>> = queries.vectors().iter().map(|q| encode_f32(q)).collect();
    let oracle: Vec<_> = queries
        .vectors()
        .iter()
        .map(|query| brute_force_top_k(index.space(), source.vectors(), query, K))
        .collect();

    let mut group = c.benchmark_group("hnsw_query");
    for &ef in EF_SWEEP {
        index.set_ef(ef);
        let mut score = RecallScore::default();
        for (query, truth) in encoded.iter().zip(&oracle) {
            let hits = index.search_knn_closer_first(query, K, None)?;
            score = score.merge(recall_at_k(truth, &hits, K));
        }
        report_recall(ef, score);

        let label = QueryBenchParams { ef, k: K };
        group.bench_function(BenchmarkId::from_parameter(&label), |b| {
            b.iter(|| {
                for query in &encoded {
                    if let Err(err) = index.search_knn(black_box(query), K, None) {
                        panic!("query failed for {label}: {err}");
                    }
                }
            });
        });
    }
    group.finish();
    Ok(())
}

#[expect(
    clippy::print_stdout,
    reason = "Criterion has no channel for quality metrics beside timings"
)]
fn report_recall(ef: usize, score: RecallScore) {
    println!("recall@{K} ef={ef}: {}/{}", score.hits, score.total);
}

fn hnsw_build(c: &mut Criterion) {
    if let Err(err) = hnsw_build_impl(c) {
        panic!("hnsw_build benchmark setup failed: {err}");
    }
}

fn hnsw_query(c: &mut Criterion) {
    if let Err(err) = hnsw_query_impl(c) {
        panic!("hnsw_query benchmark setup failed: {err}");
    }
}

criterion_group!(benches, hnsw_build, hnsw_query);
criterion_main!(benches);
