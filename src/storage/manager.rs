//! Storage Manager
//!
//! Owns the leveled set of SSTables and coordinates reads and writes.
//!
//! ## Responsibilities
//! - Discover existing SSTables on startup
//! - Search levels shallow → deep (newest table first within a level)
//! - Create new level-0 SSTables from memtable flushes
//! - Swap compaction inputs for their output and delete the inputs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Config;
use crate::error::Result;
use crate::memtable::FrozenMemTable;
use crate::record::{Record, RecordKV};

use super::cache::BlockCache;
use super::sstable::{parse_table_name, table_path, SSTable, SSTableOptions, SSTableWriter};

/// Tables per level, oldest → newest
pub type Levels = Vec<Vec<Arc<SSTable>>>;

/// Manages the storage layer
///
/// ## Concurrency:
/// - `levels`: protected by RwLock; readers clone a snapshot of `Arc`s and
///   search it without holding the lock
/// - `next_table_id`: atomic counter (lock-free)
/// - All methods use `&self`
pub struct StorageManager {
    /// Directory where SSTables are stored
    dir: PathBuf,

    levels: RwLock<Levels>,

    /// Next id for new SSTables (atomic, lock-free)
    next_table_id: AtomicU64,

    cache: Arc<BlockCache>,

    options: SSTableOptions,
}

impl StorageManager {
    /// Open or create storage in `dir`.
    ///
    /// On startup:
    /// 1. Create the directory if it doesn't exist
    /// 2. Remove leftover temp files from interrupted writes
    /// 3. Open every `L{level}-{id}.sst`; unusable tables are logged and
    ///    left out
    /// 4. Order each level by id (oldest first)
    pub fn open(dir: &Path, config: &Config, cache: Arc<BlockCache>) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut levels: Levels = vec![Vec::new(); config.max_level + 1];
        let mut max_id = 0;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.to_string_lossy().ends_with(".sst.tmp") {
                tracing::warn!(path = %path.display(), "removing partial SSTable");
                let _ = fs::remove_file(&path);
                continue;
            }
            let Some((level, id)) = parse_table_name(&path) else {
                continue;
            };
            max_id = max_id.max(id);

            match SSTable::open(&path, Some(Arc::clone(&cache))) {
                Ok(table) => {
                    if level >= levels.len() {
                        levels.resize_with(level + 1, Vec::new);
                    }
                    levels[level].push(Arc::new(table));
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "SSTable unusable, ignoring it");
                }
            }
        }

        for level in &mut levels {
            level.sort_by_key(|t| t.id());
        }

        let tables: usize = levels.iter().map(Vec::len).sum();
        tracing::debug!(dir = %dir.display(), tables, "storage opened");

        Ok(Self {
            dir: dir.to_path_buf(),
            levels: RwLock::new(levels),
            next_table_id: AtomicU64::new(max_id + 1),
            cache,
            options: SSTableOptions::from(config),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    pub fn options(&self) -> SSTableOptions {
        self.options
    }

    /// Allocate the id of a new table
    pub fn next_table_id(&self) -> u64 {
        self.next_table_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Start writing a new table at `level`
    pub fn create_writer(&self, level: usize, expected_records: usize) -> Result<SSTableWriter> {
        let id = self.next_table_id();
        SSTableWriter::create(
            &table_path(&self.dir, level, id),
            id,
            level,
            expected_records,
            self.options,
        )
    }

    pub fn open_table(&self, path: &Path) -> Result<Arc<SSTable>> {
        Ok(Arc::new(SSTable::open(path, Some(Arc::clone(&self.cache)))?))
    }

    /// Write `records` (sorted, tombstones included) as a new level-0 table
    /// and make it visible to readers.
    pub fn write_level0(&self, records: &[RecordKV]) -> Result<Option<Arc<SSTable>>> {
        if records.is_empty() {
            return Ok(None);
        }
        let mut writer = self.create_writer(0, records.len())?;
        for kv in records {
            if let Err(e) = writer.add(kv) {
                writer.abandon();
                return Err(e);
            }
        }
        let path = writer.finish()?;
        let table = self.open_table(&path)?;
        self.levels.write()[0].push(Arc::clone(&table));
        Ok(Some(table))
    }

    /// Persist a retired memtable as a level-0 table
    pub fn flush_frozen(&self, frozen: &FrozenMemTable) -> Result<Option<Arc<SSTable>>> {
        let table = self.write_level0(&frozen.snapshot())?;
        if let Some(table) = &table {
            tracing::debug!(
                generation = frozen.generation(),
                table = table.id(),
                records = table.record_count(),
                "memtable flushed"
            );
        }
        Ok(table)
    }

    /// Copy of the level lists (cheap: clones `Arc`s)
    pub fn snapshot(&self) -> Levels {
        self.levels.read().clone()
    }

    /// Number of tables per level
    pub fn level_counts(&self) -> Vec<usize> {
        self.levels.read().iter().map(Vec::len).collect()
    }

    pub fn table_count(&self) -> usize {
        self.levels.read().iter().map(Vec::len).sum()
    }

    /// Newest on-disk version of `key`, searching levels shallow → deep and
    /// tables newest → oldest. A table that fails the read is logged and
    /// treated as absent.
    pub fn get(&self, key: &str) -> Option<Record> {
        let levels = self.snapshot();
        for tables in &levels {
            for table in tables.iter().rev() {
                match table.get(key) {
                    Ok(Some(record)) => return Some(record),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            table = %table.path().display(),
                            key,
                            error = %e,
                            "SSTable read failed, skipping table"
                        );
                    }
                }
            }
        }
        None
    }

    /// Atomically replace `inputs` at `level` by `output` at `level + 1`.
    /// Returns the inputs actually removed.
    pub fn replace(
        &self,
        level: usize,
        inputs: &[Arc<SSTable>],
        output: Option<Arc<SSTable>>,
    ) -> Vec<Arc<SSTable>> {
        let mut levels = self.levels.write();
        if levels.len() <= level + 1 {
            levels.resize_with(level + 2, Vec::new);
        }
        let mut removed = Vec::with_capacity(inputs.len());
        levels[level].retain(|t| {
            if inputs.iter().any(|i| Arc::ptr_eq(i, t)) {
                removed.push(Arc::clone(t));
                false
            } else {
                true
            }
        });
        if let Some(output) = output {
            levels[level + 1].push(output);
        }
        removed
    }

    /// Delete a table that is no longer referenced by the level lists
    pub fn delete_table(&self, table: &SSTable) -> Result<()> {
        table.evict_from_cache();
        fs::remove_file(table.path())?;
        Ok(())
    }
}
