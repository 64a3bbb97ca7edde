//! Tests for the Compactor
//!
//! These tests verify:
//! - Levels over the threshold are merged one level down
//! - The newest version of each key survives
//! - Dead records are dropped, or kept as tombstones when a deeper level
//!   may still hold the key
//! - Input tables leave the level list and the disk
//! - The deepest level is never compacted

use std::sync::Arc;

use quillkv::config::Config;
use quillkv::storage::{BlockCache, Compactor, StorageManager};
use quillkv::Value;
use tempfile::TempDir;

use super::{int, tomb};

fn setup(threshold: usize, max_level: usize) -> (TempDir, Arc<StorageManager>, Compactor) {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .compaction_threshold(threshold)
        .max_level(max_level)
        .build();
    let cache = Arc::new(BlockCache::new(1024 * 1024, 4));
    let storage = Arc::new(StorageManager::open(temp.path(), &config, cache).unwrap());
    let compactor = Compactor::new(Arc::clone(&storage), &config);
    (temp, storage, compactor)
}

#[test]
fn test_level_under_threshold_is_left_alone() {
    let (_temp, storage, compactor) = setup(2, 3);
    storage.write_level0(&[int("a", 1)]).unwrap();
    storage.write_level0(&[int("b", 1)]).unwrap();

    assert!(!compactor.needs_compaction(0));
    assert!(compactor.compact_level(0).unwrap().is_none());
    assert_eq!(storage.level_counts()[0], 2);
}

#[test]
fn test_compaction_merges_into_next_level() {
    let (_temp, storage, compactor) = setup(2, 3);
    let inputs: Vec<_> = [
        vec![int("a", 1), int("b", 1)],
        vec![int("b", 2), int("c", 2)],
        vec![int("a", 3)],
    ]
    .iter()
    .map(|batch| storage.write_level0(batch).unwrap().unwrap())
    .collect();

    assert!(compactor.needs_compaction(0));
    let outcome = compactor.compact_level(0).unwrap().unwrap();
    assert_eq!(outcome.level, 0);
    assert_eq!(outcome.inputs, 3);
    assert_eq!(outcome.records_written, 3);
    assert!(outcome.output.is_some());

    let counts = storage.level_counts();
    assert_eq!(counts[0], 0);
    assert_eq!(counts[1], 1);

    assert_eq!(storage.get("a").unwrap().value(), &Value::Int(3));
    assert_eq!(storage.get("b").unwrap().value(), &Value::Int(2));
    assert_eq!(storage.get("c").unwrap().value(), &Value::Int(2));

    for table in inputs {
        assert!(!table.path().exists());
    }
}

#[test]
fn test_dead_records_are_dropped_without_deeper_levels() {
    let (_temp, storage, compactor) = setup(1, 3);
    storage.write_level0(&[int("gone", 1), int("kept", 1)]).unwrap();
    storage.write_level0(&[tomb("gone")]).unwrap();

    let outcome = compactor.merge_level(0).unwrap().unwrap();
    assert_eq!(outcome.records_written, 1);
    assert_eq!(outcome.records_dropped, 1);
    assert!(storage.get("gone").is_none());
}

#[test]
fn test_tombstone_carried_over_deeper_version() {
    let (_temp, storage, compactor) = setup(1, 3);

    // Push an old value down to level 2
    storage.write_level0(&[int("x", 1)]).unwrap();
    compactor.merge_level(0).unwrap().unwrap();
    compactor.merge_level(1).unwrap().unwrap();
    assert_eq!(storage.level_counts()[2], 1);

    // Delete it at level 0 and compact level 0 only
    storage.write_level0(&[tomb("x"), int("y", 1)]).unwrap();
    let outcome = compactor.merge_level(0).unwrap().unwrap();
    assert_eq!(outcome.records_written, 2);

    assert!(storage.get("x").unwrap().is_tombstone());
}

#[test]
fn test_everything_dead_produces_no_output() {
    let (_temp, storage, compactor) = setup(1, 3);
    storage.write_level0(&[tomb("a")]).unwrap();
    storage.write_level0(&[tomb("b")]).unwrap();

    let outcome = compactor.merge_level(0).unwrap().unwrap();
    assert_eq!(outcome.output, None);
    assert_eq!(outcome.records_written, 0);
    assert_eq!(storage.table_count(), 0);
}

#[test]
fn test_deepest_level_is_not_compacted() {
    let (_temp, storage, compactor) = setup(1, 1);
    storage.write_level0(&[int("a", 1)]).unwrap();
    storage.write_level0(&[int("b", 1)]).unwrap();
    compactor.merge_level(0).unwrap().unwrap();

    assert!(!compactor.needs_compaction(1));
    assert!(compactor.merge_level(1).unwrap().is_none());
}

#[test]
fn test_run_pass_cascades() {
    let (_temp, storage, compactor) = setup(1, 3);
    for i in 0..4 {
        storage.write_level0(&[int(&format!("k{}", i), i)]).unwrap();
    }
    let outcomes = compactor.run_pass();
    assert!(!outcomes.is_empty());
    assert_eq!(outcomes[0].level, 0);
    for i in 0..4 {
        assert_eq!(
            storage.get(&format!("k{}", i)).unwrap().value(),
            &Value::Int(i)
        );
    }
}

#[test]
fn test_compacted_tables_survive_restart() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .compaction_threshold(1)
        .max_level(2)
        .build();
    {
        let cache = Arc::new(BlockCache::new(1024 * 1024, 4));
        let storage = Arc::new(StorageManager::open(temp.path(), &config, cache).unwrap());
        storage.write_level0(&[int("a", 1)]).unwrap();
        storage.write_level0(&[int("a", 2)]).unwrap();
        Compactor::new(Arc::clone(&storage), &config)
            .merge_level(0)
            .unwrap();
    }

    let cache = Arc::new(BlockCache::new(1024 * 1024, 4));
    let storage = StorageManager::open(temp.path(), &config, cache).unwrap();
    assert_eq!(storage.level_counts()[..2], [0, 1]);
    assert_eq!(storage.get("a").unwrap().value(), &Value::Int(2));
}
