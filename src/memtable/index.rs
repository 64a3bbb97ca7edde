//! Ordered structures backing the memtable
//!
//! Both backends expose the same [`OrderedIndex`] surface; the memtable
//! holds one behind its lock and never cares which one it is.

use std::collections::BTreeMap;

use crossbeam_skiplist::SkipMap;

use crate::config::MemTableKind;
use crate::record::{Record, RecordKV};

/// Key-ordered map of records
pub trait OrderedIndex: Send + Sync {
    fn get(&self, key: &str) -> Option<Record>;

    fn insert(&mut self, key: String, record: Record);

    fn remove(&mut self, key: &str) -> Option<Record>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry in ascending key order
    fn entries(&self) -> Vec<RecordKV>;

    fn kind(&self) -> MemTableKind;
}

/// Build an empty index of the given kind
pub fn new_index(kind: MemTableKind) -> Box<dyn OrderedIndex> {
    match kind {
        MemTableKind::SkipList => Box::new(SkipListIndex::default()),
        MemTableKind::Tree => Box::new(TreeIndex::default()),
    }
}

/// Probabilistic skip list
#[derive(Default)]
pub struct SkipListIndex {
    map: SkipMap<String, Record>,
}

impl OrderedIndex for SkipListIndex {
    fn get(&self, key: &str) -> Option<Record> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    fn insert(&mut self, key: String, record: Record) {
        self.map.insert(key, record);
    }

    fn remove(&mut self, key: &str) -> Option<Record> {
        self.map.remove(key).map(|entry| entry.value().clone())
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn entries(&self) -> Vec<RecordKV> {
        self.map
            .iter()
            .map(|entry| RecordKV::new(entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn kind(&self) -> MemTableKind {
        MemTableKind::SkipList
    }
}

/// Balanced search tree
#[derive(Default)]
pub struct TreeIndex {
    map: BTreeMap<String, Record>,
}

impl OrderedIndex for TreeIndex {
    fn get(&self, key: &str) -> Option<Record> {
        self.map.get(key).cloned()
    }

    fn insert(&mut self, key: String, record: Record) {
        self.map.insert(key, record);
    }

    fn remove(&mut self, key: &str) -> Option<Record> {
        self.map.remove(key)
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn entries(&self) -> Vec<RecordKV> {
        self.map
            .iter()
            .map(|(k, v)| RecordKV::new(k.clone(), v.clone()))
            .collect()
    }

    fn kind(&self) -> MemTableKind {
        MemTableKind::Tree
    }
}
