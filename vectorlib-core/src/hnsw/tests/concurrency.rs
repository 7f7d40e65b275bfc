//! Multi-threaded insertion, update, and query tests.
//!
//! Assertions only cover the state once every writer has finished.

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
};

use rstest::rstest;

use crate::{
    hnsw::{HnswIndex, HnswParams, Label},
    space::{L2Space, encode_f32},
};

use super::fixtures::{labels_of, random_vectors};

const THREADS: usize = 4;
const PER_THREAD: usize = 250;

#[rstest]
fn concurrent_inserts_and_queries_leave_a_consistent_graph() {
    let vectors = random_vectors(THREADS * PER_THREAD, 8, 31);
    let params = HnswParams::new(8, 64).expect("params must be valid");
    let index =
        HnswIndex::new(L2Space::new(8), vectors.len(), params).expect("index must build");
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let writers: Vec<_> = vectors
            .chunks(PER_THREAD)
            .enumerate()
            .map(|(chunk, slice)| {
                let index = &index;
                scope.spawn(move || {
                    for (offset, vector) in slice.iter().enumerate() {
                        let label = (chunk * PER_THREAD + offset) as Label;
                        index
                            .add(&encode_f32(vector), label, false)
                            .expect("insert must succeed");
                    }
                })
            })
            .collect();
        scope.spawn(|| {
            let query = encode_f32(&[0.0; 8]);
            while !done.load(Ordering::Acquire) {
                let hits = index
                    .search_knn(&query, 5, None)
                    .expect("search must succeed");
                assert!(hits.len() <= 5);
            }
        });
        for writer in writers {
            writer.join().expect("writer must not panic");
        }
        done.store(true, Ordering::Release);
    });

    assert_eq!(index.len(), vectors.len());
    index.check_invariants().expect("invariants must hold");

    index.set_ef(64);
    let found = vectors
        .iter()
        .enumerate()
        .filter(|(label, vector)| {
            index
                .search_knn_closer_first(&encode_f32(vector), 1, None)
                .map(|hits| labels_of(&hits) == vec![*label as Label])
                .unwrap_or(false)
        })
        .count();
    assert!(found * 100 >= vectors.len() * 95, "self recall too low: {found}");
}

#[rstest]
fn concurrent_updates_of_one_label_keep_a_single_slot() {
    let index = HnswIndex::new(L2Space::new(2), 64, HnswParams::default()).expect("index must build");
    for label in 0..32 {
        let x = label as f32;
        index
            .add(&encode_f32(&[x, -x]), label, false)
            .expect("insert must succeed");
    }

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let index = &index;
            scope.spawn(move || {
                for step in 0..50 {
                    let x = (worker * 50 + step) as f32;
                    index
                        .add(&encode_f32(&[x, x]), 7, false)
                        .expect("update must succeed");
                }
            });
        }
    });

    assert_eq!(index.len(), 32);
    index.check_invariants().expect("invariants must hold");
}

#[rstest]
fn concurrent_deletes_are_counted_once() {
    let index = HnswIndex::new(L2Space::new(1), 100, HnswParams::default()).expect("index must build");
    for label in 0..100 {
        index
            .add(&encode_f32(&[label as f32]), label, false)
            .expect("insert must succeed");
    }

    let rejected = AtomicUsize::new(0);
    thread::scope(|scope| {
        for _ in 0..THREADS {
            let (index, rejected) = (&index, &rejected);
            scope.spawn(move || {
                for label in 0..100 {
                    if index.mark_deleted(label).is_err() {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(index.deleted_count(), 100);
    assert_eq!(rejected.into_inner(), (THREADS - 1) * 100);
    let hits = index
        .search_knn(&encode_f32(&[50.0]), 5, None)
        .expect("search must succeed");
    assert!(hits.is_empty());
}
