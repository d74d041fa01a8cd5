//! Property-based tests for the checkpoint index backends and state values
//!
//! Uses proptest for generative testing with random inputs

use proptest::prelude::*;
use tempfile::tempdir;
use tracestate::index::*;
use tracestate::state::StateValue;
use tracestate::TraceSignature;

fn signature() -> TraceSignature {
    TraceSignature::new(77, 77)
}

fn build(
    backend: IndexBackend,
    dir: &std::path::Path,
    timestamps: &[i64],
) -> Box<dyn CheckpointIndex<u64>> {
    let options = IndexOptions {
        btree_degree: 3,
        node_cache_size: 8,
        record_cache_size: 8,
    };
    let mut index = open_index::<u64>(backend, dir, signature(), &options).unwrap();
    for (i, &ts) in timestamps.iter().enumerate() {
        index.insert(Checkpoint::new(ts, i as u64 * 3)).unwrap();
    }
    index
}

/// Lower bound over a sorted slice, as `slice::binary_search` would report
/// for the first equal element
fn expected_sorted_find(timestamps: &[i64], target: i64) -> Result<u64, u64> {
    let p = timestamps.partition_point(|&ts| ts < target);
    if timestamps.get(p) == Some(&target) {
        Ok(p as u64)
    } else {
        Err(p as u64)
    }
}

/// Lowest rank carrying `target`, or one past the rank of the greatest
/// `(timestamp, rank)` strictly before it
fn expected_tree_find(timestamps: &[i64], target: i64) -> Result<u64, u64> {
    if let Some(rank) = timestamps.iter().position(|&ts| ts == target) {
        return Ok(rank as u64);
    }
    let floor = timestamps
        .iter()
        .enumerate()
        .filter(|(_, &ts)| ts < target)
        .max_by_key(|(rank, &ts)| (ts, *rank))
        .map(|(rank, _)| rank as u64);
    Err(floor.map_or(0, |rank| rank + 1))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn sorted_backends_match_binary_search(
        mut timestamps in prop::collection::vec(-1_000i64..1_000, 0..150),
        targets in prop::collection::vec(-1_100i64..1_100, 1..20),
    ) {
        timestamps.sort();
        let dir = tempdir().unwrap();

        for backend in [IndexBackend::Memory, IndexBackend::FlatArray] {
            let index = build(backend, dir.path(), &timestamps);
            for &target in &targets {
                prop_assert_eq!(
                    index.find(target).unwrap(),
                    expected_sorted_find(&timestamps, target)
                );
            }
        }
    }

    #[test]
    fn btree_finds_in_any_order(
        timestamps in prop::collection::vec(-1_000i64..1_000, 0..150),
        targets in prop::collection::vec(-1_100i64..1_100, 1..20),
    ) {
        let dir = tempdir().unwrap();
        let index = build(IndexBackend::BTree, dir.path(), &timestamps);

        for &target in &targets {
            prop_assert_eq!(
                index.find(target).unwrap(),
                expected_tree_find(&timestamps, target)
            );
        }
        // Every stored timestamp resolves to the first rank carrying it
        for &ts in &timestamps {
            let rank = index.find(ts).unwrap().unwrap();
            prop_assert_eq!(index.get(rank).unwrap().timestamp, ts);
        }
    }

    #[test]
    fn get_returns_inserted_checkpoint(
        timestamps in prop::collection::vec(any::<i64>(), 1..60),
    ) {
        let dir = tempdir().unwrap();
        for backend in [IndexBackend::Memory, IndexBackend::FlatArray, IndexBackend::BTree] {
            let mut index = open_index::<CtfLocation>(
                backend,
                dir.path(),
                signature(),
                &IndexOptions::default(),
            )
            .unwrap();
            for (i, &ts) in timestamps.iter().enumerate() {
                let location = CtfLocation { timestamp: ts, index: i as u64 };
                let rank = index.insert(Checkpoint::new(ts, location)).unwrap();
                prop_assert_eq!(rank, i as u64);

                let stored = index.get(rank).unwrap();
                prop_assert_eq!(stored.timestamp, ts);
                prop_assert_eq!(stored.location, location);
                prop_assert_eq!(stored.rank, rank);
            }
            index.dispose().unwrap();
        }
    }

    #[test]
    fn state_value_order_is_total(a in any::<i64>(), b in any::<i32>()) {
        let x = StateValue::int64(a);
        let y = StateValue::int32(b);
        let null = StateValue::null();

        prop_assert_eq!(x.cmp(&y), (a).cmp(&(b as i64)));
        prop_assert_eq!(x.cmp(&y), y.cmp(&x).reverse());
        prop_assert!(x > null && y > null);
        prop_assert_eq!(x.compare(&null), std::cmp::Ordering::Greater);
    }

    #[test]
    fn int64_add_wraps(a in any::<i64>(), b in any::<i64>()) {
        let sum = StateValue::int64(a).add(&StateValue::int64(b)).unwrap();
        prop_assert_eq!(sum, StateValue::int64(a.wrapping_add(b)));
    }
}

#[test]
fn only_btree_search_survives_unordered_inserts() {
    let timestamps = [50, 10, 40, 20, 30];
    let dir = tempdir().unwrap();

    let tree = build(IndexBackend::BTree, dir.path(), &timestamps);
    let flat = build(IndexBackend::FlatArray, dir.path(), &timestamps);

    assert_eq!(tree.find(10).unwrap(), Ok(1));
    assert_eq!(tree.find(20).unwrap(), Ok(3));
    assert_eq!(tree.find(35).unwrap(), Err(5));

    // The flat array bisects as if the records were sorted and misses both
    assert_eq!(flat.find(10).unwrap(), Err(0));
    assert_eq!(flat.find(20).unwrap(), Err(2));

    // Rank access is unaffected by the order
    for (rank, &ts) in timestamps.iter().enumerate() {
        assert_eq!(tree.get(rank as u64).unwrap().timestamp, ts);
        assert_eq!(flat.get(rank as u64).unwrap().timestamp, ts);
    }
}
