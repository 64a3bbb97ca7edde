//! Storage Module
//!
//! Persistent storage layer: immutable SSTables organised in levels, a
//! shared block cache, and the compactor that merges levels downward.
//!
//! ## Responsibilities
//! - Persist retired memtables as level-0 SSTables
//! - Point lookups through bloom filter → sparse index → block cache
//! - Block compression and checksumming
//! - Leveled compaction with tombstone and TTL reclamation

pub mod block;
pub mod cache;
pub mod compaction;
pub mod compression;
mod manager;
pub mod sstable;

pub use block::{Block, BlockBuilder};
pub use cache::{block_id, BlockCache, CacheStats, MAX_EVICTIONS_PER_ADD};
pub use compaction::{merge_two, reclaim, CompactionOutcome, Compactor, MergeIterator};
pub use compression::{Compressor, NoCompression, SnappyCompression};
pub use manager::{Levels, StorageManager};
pub use sstable::{SSTable, SSTableMetadata, SSTableOptions, SSTableWriter};
