//! MemoryStore specifics
//!
//! These tests verify:
//! - Deletes are hard removals
//! - Expired keys are purged lazily or in bulk
//! - Read-modify-write stays atomic across threads

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use quillkv::store::Lookup;
use quillkv::{KvStore, MemoryStore, StatusCode, Value};

#[test]
fn test_delete_is_hard_removal() {
    let store = MemoryStore::new(4, 1024);
    store.set("k", Value::Int(1), 0).unwrap();
    assert_eq!(store.len(), 1);
    store.delete("k").unwrap();
    assert!(store.is_empty());
    // Deleting an absent key still reports success
    assert_eq!(store.delete("k").unwrap(), StatusCode::Updated);
}

#[test]
fn test_purge_expired_in_bulk() {
    let store = MemoryStore::new(4, 1024);
    for i in 0..10 {
        store.set(&format!("short{}", i), Value::Int(i), 1).unwrap();
    }
    store.set("long", Value::Int(0), 0).unwrap();

    thread::sleep(Duration::from_millis(2100));
    assert_eq!(store.len(), 1);
    assert_eq!(store.purge_expired(), 10);
    assert_eq!(store.get("long").unwrap(), Lookup::Found(Value::Int(0)));
}

#[test]
fn test_incr_on_expired_key_starts_from_zero() {
    let store = MemoryStore::new(1, 1024);
    store.set("c", Value::Int(50), 1).unwrap();
    thread::sleep(Duration::from_millis(2100));
    assert_eq!(store.incr_decr_integer("c", 1, true).unwrap(), 1);
}

#[test]
fn test_concurrent_incr_across_shards() {
    let store = Arc::new(MemoryStore::new(16, 1024));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..200 {
                    store.incr_decr_integer("shared", 1, true).unwrap();
                    store
                        .set(&format!("t{}-{}", t, i), Value::Int(i), 0)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.get("shared").unwrap(), Lookup::Found(Value::Int(1600)));
    assert_eq!(store.len(), 1601);
}
