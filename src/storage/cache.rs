//! Block Cache
//!
//! Sharded LRU cache of decoded blocks, bounded by total bytes.
//!
//! ## Structure
//! - `shard = block_id % shard_count`, each shard behind its own mutex
//! - Per-shard budget is `total_bytes / shard_count`
//! - LRU order per shard: a monotonically increasing access tick, with a
//!   `BTreeMap<tick, id>` giving the least recently used entry in O(log n)

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bloom::{fnv1a_64, FNV_OFFSET_BASIS};
use crate::error::{QuillError, Result};
use crate::record::Record;

use super::block::Block;

/// Upper bound on entries evicted by a single `add`
pub const MAX_EVICTIONS_PER_ADD: usize = 32;

/// Stable id of a block: FNV-1a over the owning table and its key range
pub fn block_id(table_id: u64, first_key: &str, last_key: &str) -> u64 {
    let mut hash = fnv1a_64(&table_id.to_be_bytes(), FNV_OFFSET_BASIS);
    hash = fnv1a_64(first_key.as_bytes(), hash);
    // Separator so ("ab", "c") and ("a", "bc") differ
    hash = fnv1a_64(&[0xff], hash);
    fnv1a_64(last_key.as_bytes(), hash)
}

struct Shard {
    entries: HashMap<u64, (Arc<Block>, u64)>,
    lru: BTreeMap<u64, u64>,
    bytes: usize,
    tick: u64,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            lru: BTreeMap::new(),
            bytes: 0,
            tick: 0,
        }
    }

    fn touch(&mut self, id: u64) -> Option<Arc<Block>> {
        self.tick += 1;
        let tick = self.tick;
        let (block, last) = self.entries.get_mut(&id)?;
        self.lru.remove(&*last);
        *last = tick;
        self.lru.insert(tick, id);
        Some(Arc::clone(block))
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, id)) = self.lru.pop_first() else {
            return false;
        };
        if let Some((block, _)) = self.entries.remove(&id) {
            self.bytes -= block.size();
        }
        true
    }
}

/// Counters reported by [`BlockCache::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub bytes: usize,
    pub blocks: usize,
}

/// Sharded LRU block cache
pub struct BlockCache {
    shards: Vec<Mutex<Shard>>,
    shard_budget: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BlockCache {
    pub fn new(total_bytes: usize, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::new())).collect(),
            shard_budget: total_bytes / shard_count,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn shard(&self, id: u64) -> &Mutex<Shard> {
        &self.shards[(id % self.shards.len() as u64) as usize]
    }

    /// Insert `block` as most recently used (or just touch it if present).
    /// Returns false when the block is larger than a shard's budget.
    pub fn add(&self, block: Arc<Block>) -> bool {
        let id = block.id();
        let size = block.size();
        if size > self.shard_budget {
            return false;
        }

        let mut shard = self.shard(id).lock();
        if shard.touch(id).is_some() {
            return true;
        }

        let mut evicted = 0;
        while shard.bytes + size > self.shard_budget && evicted < MAX_EVICTIONS_PER_ADD {
            if !shard.evict_lru() {
                break;
            }
            evicted += 1;
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);

        shard.tick += 1;
        let tick = shard.tick;
        shard.lru.insert(tick, id);
        shard.entries.insert(id, (block, tick));
        shard.bytes += size;
        true
    }

    /// Cached block for `id`, promoting it to most recently used
    pub fn get_block(&self, id: u64) -> Option<Arc<Block>> {
        let found = self.shard(id).lock().touch(id);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Look `key` up inside cached block `id`.
    ///
    /// `CacheMiss` means the block is not resident; `KeyNotInBlock` means it
    /// is resident and does not hold the key.
    pub fn search_block(&self, id: u64, key: &str) -> Result<Record> {
        let block = self.get_block(id).ok_or(QuillError::CacheMiss)?;
        block.search(key).cloned().ok_or(QuillError::KeyNotInBlock)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.shard(id).lock().entries.contains_key(&id)
    }

    /// Drop a block (used when its table is deleted)
    pub fn remove(&self, id: u64) {
        let mut shard = self.shard(id).lock();
        if let Some((block, tick)) = shard.entries.remove(&id) {
            shard.lru.remove(&tick);
            shard.bytes -= block.size();
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn stats(&self) -> CacheStats {
        let (bytes, blocks) = self.shards.iter().fold((0, 0), |(bytes, blocks), shard| {
            let shard = shard.lock();
            (bytes + shard.bytes, blocks + shard.entries.len())
        });
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes,
            blocks,
        }
    }
}
