//! Retired memtables awaiting flush

use crate::bloom::BloomFilter;
use crate::record::{now_secs, Record, RecordKV};
use crate::store::Lookup;

use super::OrderedIndex;

/// A memtable that has been swapped out and is read-only
pub struct FrozenMemTable {
    generation: u64,
    index: Box<dyn OrderedIndex>,
    bloom: BloomFilter,
    size: usize,
}

impl FrozenMemTable {
    pub(super) fn new(
        generation: u64,
        index: Box<dyn OrderedIndex>,
        bloom: BloomFilter,
        size: usize,
    ) -> Self {
        Self {
            generation,
            index,
            bloom,
            size,
        }
    }

    /// Monotonic id of the truncation that produced this table
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, key: &str) -> Lookup<Record> {
        if !self.bloom.may_contain(key.as_bytes()) {
            return Lookup::NotFound;
        }
        match self.index.get(key) {
            None => Lookup::NotFound,
            Some(record) if record.is_tombstone() => Lookup::Tombstoned,
            Some(record) if record.is_expired(now_secs()) => Lookup::Expired,
            Some(record) => Lookup::Found(record),
        }
    }

    /// Flushable view: every key in order, expired records turned into
    /// tombstones so they keep shadowing older versions on disk.
    pub fn snapshot(&self) -> Vec<RecordKV> {
        super::table::tombstone_expired(self.index.entries(), now_secs())
    }
}

impl std::fmt::Debug for FrozenMemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrozenMemTable")
            .field("generation", &self.generation)
            .field("entries", &self.index.len())
            .field("size", &self.size)
            .finish()
    }
}
