//! Recall benchmark against exhaustive search.

use rstest::rstest;

use crate::{
    hnsw::{HnswParams, Label},
    space::encode_f32,
};

use super::fixtures::{brute_force, labels_of, random_index, random_vectors, self_hits};

#[rstest]
#[ignore = "builds a 10 000 element index; run with --ignored"]
fn recall_at_ten_reaches_ninety_five_percent() {
    const K: usize = 10;
    let vectors = random_vectors(10_000, 16, 1);
    let params = HnswParams::new(16, 200)
        .expect("params must be valid")
        .with_rng_seed(100);
    let index = random_index(&vectors, params, vectors.len());
    index.set_ef(200);

    let queries = random_vectors(100, 16, 2);
    let mut found = 0;
    for query in &queries {
        let hits = index
            .search_knn_closer_first(&encode_f32(query), K, None)
            .expect("search must succeed");
        let truth: Vec<Label> = brute_force(index.space(), &vectors, query, K);
        found += labels_of(&hits)
            .iter()
            .filter(|label| truth.contains(label))
            .count();
    }
    let recall = found as f64 / (queries.len() * K) as f64;
    assert!(recall >= 0.95, "recall@{K} was {recall:.3}");
}

#[rstest]
#[ignore = "builds a 10 000 element index; run with --ignored"]
fn stored_vectors_find_themselves() {
    let vectors = random_vectors(10_000, 16, 3);
    let params = HnswParams::new(16, 200)
        .expect("params must be valid")
        .with_rng_seed(7);
    let index = random_index(&vectors, params, vectors.len());
    index.set_ef(50);

    let found = self_hits(&index, &vectors);
    assert!(
        found * 100 >= vectors.len() * 95,
        "only {found} of {} vectors found themselves",
        vectors.len()
    );
}
