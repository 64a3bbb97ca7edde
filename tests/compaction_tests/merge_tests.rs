//! Tests for the merge primitives
//!
//! These tests verify:
//! - Two-way merge keeps order and lets the newer batch win
//! - Reclamation drops dead records unless a deeper level needs a tombstone
//! - The k-way merge picks the newest source per key

use quillkv::record::{Record, RecordKV};
use quillkv::storage::{merge_two, reclaim, MergeIterator};
use quillkv::Value;

use super::{int, tomb};

fn keys(records: &[RecordKV]) -> Vec<&str> {
    records.iter().map(|kv| kv.key.as_str()).collect()
}

/// `(key, int value)` pairs; write timestamps are ignored
fn ints(records: &[RecordKV]) -> Vec<(&str, i64)> {
    records
        .iter()
        .map(|kv| (kv.key.as_str(), kv.record.value().as_int().unwrap_or(-1)))
        .collect()
}

fn sources(batches: Vec<Vec<RecordKV>>) -> Vec<std::vec::IntoIter<quillkv::Result<RecordKV>>> {
    batches
        .into_iter()
        .map(|batch| batch.into_iter().map(Ok).collect::<Vec<_>>().into_iter())
        .collect()
}

// =============================================================================
// merge_two / reclaim
// =============================================================================

#[test]
fn test_merge_then_reclaim_example() {
    let older = vec![int("a", 1), tomb("b")];
    let newer = vec![int("b", 5), int("c", 9)];

    let merged = reclaim(merge_two(&older, &newer), 0, |_| false);

    assert_eq!(ints(&merged), vec![("a", 1), ("b", 5), ("c", 9)]);
}

#[test]
fn test_newer_tombstone_wins_and_is_dropped() {
    let older = vec![int("a", 1), int("b", 2)];
    let newer = vec![tomb("a")];

    let merged = merge_two(&older, &newer);
    assert_eq!(keys(&merged), vec!["a", "b"]);
    assert!(merged[0].record.is_tombstone());

    let reclaimed = reclaim(merged, 0, |_| false);
    assert_eq!(ints(&reclaimed), vec![("b", 2)]);
}

#[test]
fn test_tombstone_kept_when_deeper_level_may_hold_key() {
    let merged = merge_two(&[tomb("a"), int("b", 2)], &[]);
    let reclaimed = reclaim(merged, 0, |key| key == "a");
    assert_eq!(keys(&reclaimed), vec!["a", "b"]);
    assert!(reclaimed[0].record.is_tombstone());
}

#[test]
fn test_expired_record_becomes_tombstone_or_vanishes() {
    let expired = RecordKV::new("e", Record::scalar(Value::Int(1), 100));
    assert!(reclaim(vec![expired.clone()], 200, |_| false).is_empty());

    let shadowing = reclaim(vec![expired], 200, |_| true);
    assert_eq!(shadowing.len(), 1);
    assert!(shadowing[0].record.is_tombstone());
}

#[test]
fn test_merge_interleaves_disjoint_batches() {
    let merged = merge_two(&[int("a", 1), int("c", 3)], &[int("b", 2), int("d", 4)]);
    assert_eq!(keys(&merged), vec!["a", "b", "c", "d"]);
}

// =============================================================================
// MergeIterator
// =============================================================================

#[test]
fn test_k_way_merge_newest_source_wins() {
    let merge = MergeIterator::new(sources(vec![
        vec![int("a", 1), int("b", 1), int("d", 1)],
        vec![int("b", 2), int("c", 2)],
        vec![int("a", 3), int("d", 3)],
    ]))
    .unwrap();

    let merged: Vec<RecordKV> = merge.collect::<quillkv::Result<_>>().unwrap();
    assert_eq!(ints(&merged), vec![("a", 3), ("b", 2), ("c", 2), ("d", 3)]);
}

#[test]
fn test_k_way_merge_with_empty_sources() {
    let mut merge = MergeIterator::new(sources(vec![vec![], vec![int("x", 1)], vec![]])).unwrap();
    let only = merge.next_record().unwrap().unwrap();
    assert_eq!(only.key, "x");
    assert_eq!(merge.next_record().unwrap(), None);
}

#[test]
fn test_k_way_merge_propagates_source_errors() {
    let failing = vec![
        Ok(int("a", 1)),
        Err(quillkv::QuillError::CacheMiss),
    ]
    .into_iter();
    let mut merge = MergeIterator::new(vec![failing]).unwrap();
    assert!(merge.next_record().is_err());
}
