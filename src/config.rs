//! Configuration for QuillKV
//!
//! Centralized configuration with sensible defaults. Loading from files or
//! the environment is left to the embedding application; this module only
//! describes the knobs and checks that they are coherent.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{QuillError, Result};

/// Main configuration for a QuillKV engine instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log          (write-ahead log)
    ///     └── sstables/        (L{level}-{id}.sst files)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// How appends reach the disk
    pub wal_mode: WalMode,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Ordered structure backing the memtable
    pub memtable_kind: MemTableKind,

    /// Max accumulated size of memtable before flush (in bytes)
    pub memtable_max_bytes: usize,

    /// Max number of entries before flush
    pub memtable_max_records: usize,

    /// Target false-positive rate of memtable and SSTable bloom filters
    pub bloom_false_positive_rate: f64,

    /// Largest encoded value accepted by `set`
    pub max_value_bytes: usize,

    /// Capacity of the queue handing retired memtables to the flush worker
    pub flush_queue_capacity: usize,

    // -------------------------------------------------------------------------
    // SSTable / Cache Configuration
    // -------------------------------------------------------------------------
    /// Max stored size of a single block (in bytes)
    pub block_max_size: usize,

    /// Block transform applied before writing
    pub compression: CompressionKind,

    /// Total byte budget of the block cache
    pub block_cache_bytes: usize,

    /// Number of independent block cache shards
    pub block_cache_shards: usize,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// A level is compacted once it holds more SSTables than this
    pub compaction_threshold: usize,

    /// Deepest level; tables at this level are never compacted further
    pub max_level: usize,

    /// Pause between levels (and between passes) of the compaction driver
    pub compaction_pacing: Duration,
}

/// WAL durability mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WalMode {
    /// Write every frame inline; optionally fsync after each one
    Sync { fsync: bool },

    /// Buffer frames; a background flusher drains the buffer
    Async {
        /// Buffer size that triggers an immediate flush (bytes)
        buffer_size: usize,
        /// Timer-driven flush period
        flush_interval: Duration,
        /// fsync once every N flushes
        sync_every_n_flushes: u32,
        /// Write attempts per flush before the batch is dropped
        max_flush_retries: u32,
    },
}

impl WalMode {
    /// Async mode with default tuning
    pub fn asynchronous() -> Self {
        WalMode::Async {
            buffer_size: 64 * 1024,
            flush_interval: Duration::from_millis(100),
            sync_every_n_flushes: 10,
            max_flush_retries: 5,
        }
    }
}

/// Memtable ordered-index backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemTableKind {
    /// Probabilistic skip list
    SkipList,
    /// Balanced search tree
    Tree,
}

/// Block compression algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    None,
    Snappy,
}

impl CompressionKind {
    /// Tag recorded in SSTable metadata
    pub fn tag(self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Snappy => "snappy",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./quillkv_data"),
            wal_mode: WalMode::Sync { fsync: false },
            memtable_kind: MemTableKind::SkipList,
            memtable_max_bytes: 64 * 1024 * 1024, // 64 MB
            memtable_max_records: 1_000_000,
            bloom_false_positive_rate: 0.01,
            max_value_bytes: 1024 * 1024, // 1 MB
            flush_queue_capacity: 4,
            block_max_size: 4 * 1024, // 4 KB
            compression: CompressionKind::None,
            block_cache_bytes: 64 * 1024 * 1024,
            block_cache_shards: 64,
            compaction_threshold: 4,
            max_level: 6,
            compaction_pacing: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.memtable_max_bytes == 0 || self.memtable_max_records == 0 {
            return Err(QuillError::Config(
                "memtable limits must be greater than zero".to_string(),
            ));
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return Err(QuillError::Config(format!(
                "bloom false-positive rate must be in (0, 1), got {}",
                self.bloom_false_positive_rate
            )));
        }
        if self.block_max_size == 0 {
            return Err(QuillError::Config("block_max_size must be > 0".to_string()));
        }
        if self.block_cache_shards == 0 {
            return Err(QuillError::Config(
                "block_cache_shards must be > 0".to_string(),
            ));
        }
        if self.compaction_threshold == 0 {
            return Err(QuillError::Config(
                "compaction_threshold must be > 0".to_string(),
            ));
        }
        if self.flush_queue_capacity == 0 {
            return Err(QuillError::Config(
                "flush_queue_capacity must be > 0".to_string(),
            ));
        }
        if let WalMode::Async {
            buffer_size,
            sync_every_n_flushes,
            ..
        } = self.wal_mode
        {
            if buffer_size == 0 || sync_every_n_flushes == 0 {
                return Err(QuillError::Config(
                    "async WAL buffer size and sync interval must be > 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL mode
    pub fn wal_mode(mut self, mode: WalMode) -> Self {
        self.config.wal_mode = mode;
        self
    }

    /// Select the memtable backend
    pub fn memtable_kind(mut self, kind: MemTableKind) -> Self {
        self.config.memtable_kind = kind;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_max_bytes(mut self, size: usize) -> Self {
        self.config.memtable_max_bytes = size;
        self
    }

    /// Set the memtable entry limit
    pub fn memtable_max_records(mut self, count: usize) -> Self {
        self.config.memtable_max_records = count;
        self
    }

    pub fn bloom_false_positive_rate(mut self, rate: f64) -> Self {
        self.config.bloom_false_positive_rate = rate;
        self
    }

    pub fn max_value_bytes(mut self, size: usize) -> Self {
        self.config.max_value_bytes = size;
        self
    }

    pub fn flush_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.flush_queue_capacity = capacity;
        self
    }

    /// Set the max block size (in bytes)
    pub fn block_max_size(mut self, size: usize) -> Self {
        self.config.block_max_size = size;
        self
    }

    pub fn compression(mut self, kind: CompressionKind) -> Self {
        self.config.compression = kind;
        self
    }

    /// Set the total block cache budget (in bytes)
    pub fn block_cache_bytes(mut self, size: usize) -> Self {
        self.config.block_cache_bytes = size;
        self
    }

    pub fn block_cache_shards(mut self, shards: usize) -> Self {
        self.config.block_cache_shards = shards;
        self
    }

    /// Set the per-level SSTable count that triggers compaction
    pub fn compaction_threshold(mut self, count: usize) -> Self {
        self.config.compaction_threshold = count;
        self
    }

    pub fn max_level(mut self, level: usize) -> Self {
        self.config.max_level = level;
        self
    }

    pub fn compaction_pacing(mut self, pacing: Duration) -> Self {
        self.config.compaction_pacing = pacing;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
