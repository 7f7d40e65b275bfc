//! Serialisation round trips and corruption handling.

use rstest::{fixture, rstest};

use crate::{
    error::HnswError,
    hnsw::{HnswIndex, HnswParams, IndexHeader, LoadOptions},
    space::L2Space,
};

use super::fixtures::{labels_of, line_index, point};

const RECORD_START: usize = IndexHeader::ENCODED_LEN;

#[fixture]
fn saved() -> (HnswIndex<L2Space>, Vec<u8>) {
    let index = line_index(8, 4);
    index.mark_deleted(6).expect("delete must succeed");
    let mut bytes = Vec::new();
    index.write_to(&mut bytes).expect("write must succeed");
    (index, bytes)
}

fn reload(bytes: &[u8], options: LoadOptions) -> Result<HnswIndex<L2Space>, HnswError> {
    HnswIndex::read_from(L2Space::new(1), bytes, options)
}

fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Keeps only the header and claims sixty million stored nodes.
fn inflate_count(bytes: &mut Vec<u8>) {
    bytes.truncate(RECORD_START);
    put_u64(bytes, 8, 60_000_000);
    put_u64(bytes, 16, 60_000_000);
}

#[rstest]
fn stream_round_trip_is_byte_identical(saved: (HnswIndex<L2Space>, Vec<u8>)) {
    let (original, bytes) = saved;
    let restored = reload(&bytes, LoadOptions::default()).expect("load must succeed");

    let mut again = Vec::new();
    restored.write_to(&mut again).expect("write must succeed");
    assert_eq!(again, bytes);
    assert_eq!(restored.len(), original.len());
    assert_eq!(restored.capacity(), original.capacity());
    assert_eq!(restored.deleted_count(), 1);
    assert_eq!(restored.max_level(), original.max_level());
    assert!(restored.is_deleted(6).expect("label must exist"));
    restored.check_invariants().expect("invariants must hold");

    restored.set_ef(64);
    let hits = restored
        .search_knn_closer_first(&point(6.2), 2, None)
        .expect("search must succeed");
    assert_eq!(labels_of(&hits), vec![7, 5]);
}

#[rstest]
fn header_describes_the_index(saved: (HnswIndex<L2Space>, Vec<u8>)) {
    let (index, bytes) = saved;
    let header = IndexHeader::read_from(bytes.as_slice()).expect("header must decode");
    assert_eq!(header.offset_level0, 0);
    assert_eq!(header.element_count, 8);
    assert_eq!(header.max_elements, 8);
    assert_eq!(header.m, 4);
    assert_eq!(header.max_m, 4);
    assert_eq!(header.max_m0, 8);
    assert_eq!(header.ef_construction, 64);
    assert_eq!(header.data_offset, 9 * 4);
    assert_eq!(header.label_offset, 9 * 4 + 4);
    assert_eq!(header.record_size, 9 * 4 + 4 + 8);
    assert_eq!(
        header.max_level,
        index.max_level().map_or(-1, |level| level as i32)
    );
    assert_eq!(header.level_multiplier, index.params().level_multiplier());
}

#[rstest]
fn file_round_trip_preserves_results() {
    let index = line_index(30, 6);
    let dir = tempfile::tempdir().expect("tempdir must be created");
    let path = dir.path().join("line.hnsw");
    index.save(&path).expect("save must succeed");

    let restored =
        HnswIndex::load(L2Space::new(1), &path, LoadOptions::default()).expect("load must succeed");
    restored.set_ef(64);
    for query in [0.2_f32, 11.7, 29.4] {
        let expected = index
            .search_knn_closer_first(&point(query), 4, None)
            .expect("search must succeed");
        let actual = restored
            .search_knn_closer_first(&point(query), 4, None)
            .expect("search must succeed");
        assert_eq!(actual, expected);
    }
}

#[rstest]
fn empty_index_round_trips() {
    let index = HnswIndex::new(L2Space::new(1), 5, HnswParams::default()).expect("index must build");
    let mut bytes = Vec::new();
    index.write_to(&mut bytes).expect("write must succeed");
    assert_eq!(bytes.len(), IndexHeader::ENCODED_LEN);

    let restored = reload(&bytes, LoadOptions::default()).expect("load must succeed");
    assert!(restored.is_empty());
    assert_eq!(restored.capacity(), 5);
    restored.add(&point(1.0), 1, false).expect("insert must succeed");
}

#[rstest]
fn missing_file_reports_its_path() {
    let dir = tempfile::tempdir().expect("tempdir must be created");
    let path = dir.path().join("absent.hnsw");
    let err = HnswIndex::load(L2Space::new(1), &path, LoadOptions::default())
        .expect_err("missing file must fail");
    match err {
        HnswError::Io { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[rstest]
#[case(0, 8)]
#[case(20, 20)]
fn load_options_choose_the_capacity(
    saved: (HnswIndex<L2Space>, Vec<u8>),
    #[case] requested: usize,
    #[case] expected: usize,
) {
    let (_, bytes) = saved;
    let restored = reload(
        &bytes,
        LoadOptions {
            max_elements: requested,
            ..LoadOptions::default()
        },
    )
    .expect("load must succeed");
    assert_eq!(restored.capacity(), expected);
}

#[rstest]
fn load_rejects_a_capacity_below_the_population(saved: (HnswIndex<L2Space>, Vec<u8>)) {
    let (_, bytes) = saved;
    let err = reload(
        &bytes,
        LoadOptions {
            max_elements: 4,
            ..LoadOptions::default()
        },
    )
    .expect_err("capacity must cover the stored elements");
    assert!(matches!(err, HnswError::CapacityExceeded { capacity: 4 }));
}

#[rstest]
fn loaded_tombstones_become_vacant_slots(saved: (HnswIndex<L2Space>, Vec<u8>)) {
    let (_, bytes) = saved;
    let restored = reload(
        &bytes,
        LoadOptions {
            allow_replace_deleted: true,
            ..LoadOptions::default()
        },
    )
    .expect("load must succeed");
    let id = restored
        .add(&point(6.5), 60, true)
        .expect("replacement must succeed");
    assert_eq!(id, 6);
    assert!(!restored.contains(6).expect("lookup must succeed"));
    assert_eq!(restored.deleted_count(), 0);
}

#[rstest]
#[case::truncated(|bytes: &mut Vec<u8>| { bytes.pop(); })]
#[case::trailing(|bytes: &mut Vec<u8>| bytes.push(0))]
#[case::header_only(|bytes: &mut Vec<u8>| bytes.truncate(RECORD_START))]
#[case::empty(|bytes: &mut Vec<u8>| bytes.clear())]
#[case::overfull_list(|bytes: &mut Vec<u8>| put_u32(bytes, RECORD_START, 9))]
#[case::self_link(|bytes: &mut Vec<u8>| put_u32(bytes, RECORD_START + 4, 0))]
#[case::entry_out_of_range(|bytes: &mut Vec<u8>| put_u32(bytes, 52, 1000))]
#[case::layout_mismatch(|bytes: &mut Vec<u8>| bytes[24] ^= 0x01)]
#[case::inflated_count(inflate_count)]
#[case::huge_level_multiplier(|bytes: &mut Vec<u8>| bytes[80..88].copy_from_slice(&1.0e300_f64.to_le_bytes()))]
#[case::top_layer_out_of_range(|bytes: &mut Vec<u8>| put_u32(bytes, 48, 1000))]
fn corrupted_streams_are_rejected(
    saved: (HnswIndex<L2Space>, Vec<u8>),
    #[case] damage: fn(&mut Vec<u8>),
) {
    let (_, mut bytes) = saved;
    damage(&mut bytes);
    let err = reload(&bytes, LoadOptions::default()).expect_err("damaged stream must fail");
    assert!(
        matches!(err, HnswError::Corrupted { .. }),
        "unexpected error: {err:?}"
    );
}

#[rstest]
fn duplicate_labels_are_rejected(saved: (HnswIndex<L2Space>, Vec<u8>)) {
    let (_, mut bytes) = saved;
    let header = IndexHeader::read_from(bytes.as_slice()).expect("header must decode");
    let record = header.record_size as usize;
    let label_at = RECORD_START + record + header.label_offset as usize;
    bytes[label_at..label_at + 8].copy_from_slice(&0u64.to_le_bytes());

    let err = reload(&bytes, LoadOptions::default()).expect_err("duplicate label must fail");
    assert!(matches!(err, HnswError::Corrupted { .. }));
}

#[rstest]
fn loading_into_a_different_space_fails(saved: (HnswIndex<L2Space>, Vec<u8>)) {
    let (_, bytes) = saved;
    let err = HnswIndex::read_from(L2Space::new(2), bytes.as_slice(), LoadOptions::default())
        .expect_err("wider space must not match");
    assert_eq!(err.code().as_str(), "HNSW_CORRUPTED");
}

#[rstest]
fn short_file_is_rejected_before_loading(saved: (HnswIndex<L2Space>, Vec<u8>)) {
    let (_, mut bytes) = saved;
    inflate_count(&mut bytes);
    let dir = tempfile::tempdir().expect("tempdir must be created");
    let path = dir.path().join("short.hnsw");
    std::fs::write(&path, &bytes).expect("file must be written");

    let err = HnswIndex::load(L2Space::new(1), &path, LoadOptions::default())
        .expect_err("short file must fail");
    assert_eq!(err.code().as_str(), "HNSW_CORRUPTED");
}

#[rstest]
fn node_above_the_top_layer_is_rejected() {
    let index = line_index(40, 4);
    assert!(
        index.max_level().is_some_and(|level| level > 0),
        "fixture must have upper layers"
    );
    let flat = (0..40)
        .find(|&label| index.node_level(label).expect("label must exist") == 0)
        .expect("some node must stay on the base layer");
    let mut bytes = Vec::new();
    index.write_to(&mut bytes).expect("write must succeed");
    bytes[48..52].copy_from_slice(&0_i32.to_le_bytes());
    put_u32(&mut bytes, 52, flat as u32);

    let err = reload(&bytes, LoadOptions::default()).expect_err("taller node must fail");
    assert!(
        matches!(err, HnswError::Corrupted { ref reason } if reason.contains("above the top layer")),
        "unexpected error: {err:?}"
    );
}
