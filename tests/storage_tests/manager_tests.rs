//! Tests for StorageManager
//!
//! These tests verify:
//! - Opening empty and existing directories
//! - Level-0 writes and lookups across tables
//! - Newer tables shadow older ones, tombstones included
//! - Persistence and id allocation across restarts
//! - Leftover temp files and unusable tables on startup
//! - Replacing compaction inputs

use std::fs;
use std::sync::Arc;

use quillkv::config::Config;
use quillkv::memtable::MemTable;
use quillkv::record::{Record, RecordKV, RecordState, NO_EXPIRY};
use quillkv::storage::{BlockCache, StorageManager};
use quillkv::Value;
use tempfile::TempDir;

use super::sorted_records;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_manager(dir: &std::path::Path) -> StorageManager {
    let config = Config::default();
    let cache = Arc::new(BlockCache::new(1024 * 1024, 8));
    StorageManager::open(dir, &config, cache).unwrap()
}

fn int(key: &str, value: i64) -> RecordKV {
    RecordKV::new(key, Record::scalar(Value::Int(value), NO_EXPIRY))
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_creates_directory() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("sstables");
    let manager = open_manager(&dir);
    assert!(dir.exists());
    assert_eq!(manager.table_count(), 0);
}

#[test]
fn test_ignores_non_sstable_files() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("notes.txt"), b"hello").unwrap();
    let manager = open_manager(temp.path());
    assert_eq!(manager.table_count(), 0);
}

#[test]
fn test_removes_leftover_temp_files() {
    let temp = TempDir::new().unwrap();
    let leftover = temp.path().join("L0-000004.sst.tmp");
    fs::write(&leftover, b"partial").unwrap();

    open_manager(temp.path());
    assert!(!leftover.exists());
}

#[test]
fn test_skips_unusable_tables() {
    let temp = TempDir::new().unwrap();
    {
        let manager = open_manager(temp.path());
        manager.write_level0(&sorted_records(5)).unwrap();
    }
    fs::write(temp.path().join("L0-000007.sst"), b"garbage").unwrap();

    let manager = open_manager(temp.path());
    assert_eq!(manager.table_count(), 1);
    assert!(manager.get("key00002").is_some());
    // Ids never go backwards, even past a broken table
    assert!(manager.next_table_id() > 7);
}

// =============================================================================
// Write / Read Tests
// =============================================================================

#[test]
fn test_write_level0_and_get() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());

    let table = manager.write_level0(&sorted_records(20)).unwrap().unwrap();
    assert_eq!(table.level(), 0);
    assert_eq!(manager.level_counts()[0], 1);

    let record = manager.get("key00011").unwrap();
    assert_eq!(record.value(), &Value::from("value-11"));
    assert!(manager.get("nope").is_none());
}

#[test]
fn test_write_empty_batch_creates_nothing() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    assert!(manager.write_level0(&[]).unwrap().is_none());
    assert_eq!(manager.table_count(), 0);
}

#[test]
fn test_newer_table_wins() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    manager.write_level0(&[int("k", 1), int("only-old", 1)]).unwrap();
    manager.write_level0(&[int("k", 2)]).unwrap();

    assert_eq!(manager.get("k").unwrap().value(), &Value::Int(2));
    assert_eq!(manager.get("only-old").unwrap().value(), &Value::Int(1));
}

#[test]
fn test_tombstone_hides_older_value() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    manager.write_level0(&[int("k", 1)]).unwrap();
    manager
        .write_level0(&[RecordKV::new("k", Record::tombstone())])
        .unwrap();

    assert!(manager.get("k").unwrap().is_tombstone());
}

#[test]
fn test_flush_frozen_memtable() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());

    let memtable = MemTable::default();
    memtable.set("a", Value::Int(1), 0, RecordState::Active).unwrap();
    memtable.set("b", Value::Int(2), 0, RecordState::Active).unwrap();
    memtable.delete("b").unwrap();
    let frozen = memtable.truncate().unwrap().unwrap();

    let table = manager.flush_frozen(&frozen).unwrap().unwrap();
    assert_eq!(table.record_count(), 2);
    assert!(manager.get("b").unwrap().is_tombstone());
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_persistence_across_restart() {
    let temp = TempDir::new().unwrap();
    {
        let manager = open_manager(temp.path());
        manager.write_level0(&[int("a", 1)]).unwrap();
        manager.write_level0(&[int("a", 2), int("b", 3)]).unwrap();
    }

    let manager = open_manager(temp.path());
    assert_eq!(manager.table_count(), 2);
    assert_eq!(manager.get("a").unwrap().value(), &Value::Int(2));
    assert_eq!(manager.get("b").unwrap().value(), &Value::Int(3));
}

#[test]
fn test_table_ids_continue_after_restart() {
    let temp = TempDir::new().unwrap();
    let first_id = {
        let manager = open_manager(temp.path());
        manager.write_level0(&[int("a", 1)]).unwrap().unwrap().id()
    };

    let manager = open_manager(temp.path());
    let next = manager.write_level0(&[int("b", 1)]).unwrap().unwrap();
    assert!(next.id() > first_id);
}

// =============================================================================
// Replace Tests
// =============================================================================

#[test]
fn test_replace_moves_output_down_and_delete_removes_files() {
    let temp = TempDir::new().unwrap();
    let manager = open_manager(temp.path());
    let t1 = manager.write_level0(&[int("a", 1)]).unwrap().unwrap();
    let t2 = manager.write_level0(&[int("b", 2)]).unwrap().unwrap();

    let mut writer = manager.create_writer(1, 2).unwrap();
    writer.add(&int("a", 1)).unwrap();
    writer.add(&int("b", 2)).unwrap();
    let merged = manager.open_table(&writer.finish().unwrap()).unwrap();

    let removed = manager.replace(0, &[Arc::clone(&t1), Arc::clone(&t2)], Some(merged));
    assert_eq!(removed.len(), 2);
    assert_eq!(manager.level_counts()[..2], [0, 1]);

    for table in &removed {
        manager.delete_table(table).unwrap();
        assert!(!table.path().exists());
    }
    assert_eq!(manager.get("b").unwrap().value(), &Value::Int(2));
}
