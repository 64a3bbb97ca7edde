//! Leveled compaction
//!
//! When a level holds more than `compaction_threshold` tables, all of them
//! are merged into one new table one level deeper.
//!
//! ## Merge rules
//! - Inputs are ordered oldest → newest; on duplicate keys the record from
//!   the later input wins
//! - Tombstones and expired records are dropped, unless a deeper level may
//!   still hold an older version of the key; then a tombstone is written so
//!   the older version stays shadowed
//! - The output is made durable before the inputs leave the level list, and
//!   the inputs are deleted from disk only after that

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{QuillError, Result};
use crate::record::{now_secs, Record, RecordKV};
use crate::supervisor::{spawn_supervised, RestartPolicy, ShutdownListener};

use super::manager::StorageManager;
use super::sstable::SSTable;

// =============================================================================
// Merge primitives
// =============================================================================

/// Two-way merge of sorted batches; `newer` wins on equal keys.
/// Tombstones and expired records pass through; see [`reclaim`].
pub fn merge_two(older: &[RecordKV], newer: &[RecordKV]) -> Vec<RecordKV> {
    let mut out = Vec::with_capacity(older.len() + newer.len());
    let (mut i, mut j) = (0, 0);
    while i < older.len() && j < newer.len() {
        match older[i].key.cmp(&newer[j].key) {
            Ordering::Less => {
                out.push(older[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                out.push(newer[j].clone());
                j += 1;
            }
            Ordering::Equal => {
                out.push(newer[j].clone());
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&older[i..]);
    out.extend_from_slice(&newer[j..]);
    out
}

/// Drop dead records (tombstoned or expired at `now`). A dead record whose
/// key `shadows` reports as possibly present deeper is kept as a tombstone.
pub fn reclaim(
    records: Vec<RecordKV>,
    now: i64,
    mut shadows: impl FnMut(&str) -> bool,
) -> Vec<RecordKV> {
    records
        .into_iter()
        .filter_map(|kv| reclaim_one(kv, now, &mut shadows))
        .collect()
}

fn reclaim_one(
    kv: RecordKV,
    now: i64,
    shadows: &mut impl FnMut(&str) -> bool,
) -> Option<RecordKV> {
    if kv.record.is_live(now) {
        Some(kv)
    } else if shadows(&kv.key) {
        Some(RecordKV::new(kv.key, Record::tombstone()))
    } else {
        None
    }
}

struct HeapEntry {
    kv: RecordKV,
    /// Position of the input; higher is newer
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.kv.key == other.kv.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: smallest key first, and for equal keys
        // the newest source first.
        other
            .kv
            .key
            .cmp(&self.kv.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Streaming k-way merge over sorted inputs, oldest input first.
///
/// Yields each key once, carrying the record of the newest input that has
/// it. Reads one record ahead per input.
pub struct MergeIterator<I> {
    sources: Vec<I>,
    heap: BinaryHeap<HeapEntry>,
}

impl<I> MergeIterator<I>
where
    I: Iterator<Item = Result<RecordKV>>,
{
    pub fn new(sources: Vec<I>) -> Result<Self> {
        let mut merge = Self {
            sources,
            heap: BinaryHeap::new(),
        };
        for source in 0..merge.sources.len() {
            merge.advance(source)?;
        }
        Ok(merge)
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(next) = self.sources[source].next() {
            self.heap.push(HeapEntry { kv: next?, source });
        }
        Ok(())
    }

    /// Next merged record, or `None` when every input is exhausted
    pub fn next_record(&mut self) -> Result<Option<RecordKV>> {
        let Some(top) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(top.source)?;

        // Older duplicates of the same key sit right below; skip them.
        while self.heap.peek().is_some_and(|e| e.kv.key == top.kv.key) {
            if let Some(dup) = self.heap.pop() {
                self.advance(dup.source)?;
            }
        }
        Ok(Some(top.kv))
    }
}

impl<I> Iterator for MergeIterator<I>
where
    I: Iterator<Item = Result<RecordKV>>,
{
    type Item = Result<RecordKV>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

// =============================================================================
// Compactor
// =============================================================================

/// What one level compaction did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOutcome {
    pub level: usize,
    pub inputs: usize,
    /// Id of the new table at `level + 1`, if anything survived
    pub output: Option<u64>,
    pub records_written: u64,
    pub records_dropped: u64,
}

/// Drives leveled compaction over a [`StorageManager`]
pub struct Compactor {
    storage: Arc<StorageManager>,
    threshold: usize,
    max_level: usize,
    pacing: Duration,
    /// Serializes compactions (driver and manual passes)
    running: Mutex<()>,
}

impl Compactor {
    pub fn new(storage: Arc<StorageManager>, config: &Config) -> Self {
        Self {
            storage,
            threshold: config.compaction_threshold,
            max_level: config.max_level,
            pacing: config.compaction_pacing,
            running: Mutex::new(()),
        }
    }

    pub fn needs_compaction(&self, level: usize) -> bool {
        level < self.max_level
            && self
                .storage
                .level_counts()
                .get(level)
                .is_some_and(|&count| count > self.threshold)
    }

    /// Compact `level` if it is over the threshold
    pub fn compact_level(&self, level: usize) -> Result<Option<CompactionOutcome>> {
        if !self.needs_compaction(level) {
            return Ok(None);
        }
        self.merge_level(level)
    }

    /// Merge every table of `level` into one table at `level + 1`,
    /// regardless of the threshold
    pub fn merge_level(&self, level: usize) -> Result<Option<CompactionOutcome>> {
        if level >= self.max_level {
            return Ok(None);
        }
        let _running = self.running.lock();

        let levels = self.storage.snapshot();
        let inputs: Vec<Arc<SSTable>> = levels.get(level).cloned().unwrap_or_default();
        if inputs.is_empty() {
            return Ok(None);
        }
        let deeper: Vec<Arc<SSTable>> = levels.iter().skip(level + 1).flatten().cloned().collect();

        let expected: u64 = inputs.iter().map(|t| t.record_count()).sum();
        let mut writer = self.storage.create_writer(level + 1, expected as usize)?;
        let now = now_secs();
        let mut dropped = 0u64;

        let mut shadows = |key: &str| deeper.iter().any(|t| t.may_contain(key));
        let merged = (|| -> Result<()> {
            let sources: Vec<_> = inputs.iter().map(|t| t.iter()).collect();
            for kv in MergeIterator::new(sources)? {
                match reclaim_one(kv?, now, &mut shadows) {
                    Some(kv) => writer.add(&kv)?,
                    None => dropped += 1,
                }
            }
            Ok(())
        })();

        if let Err(e) = merged {
            writer.abandon();
            return Err(QuillError::CompactionMergeFailed(format!("level {}: {}", level, e)));
        }

        let written = writer.record_count();
        let output = if written == 0 {
            writer.abandon();
            None
        } else {
            let path = writer
                .finish()
                .map_err(|e| QuillError::CompactionMergeFailed(format!("level {}: {}", level, e)))?;
            Some(self.storage.open_table(&path)?)
        };
        let output_id = output.as_ref().map(|t| t.id());

        let removed = self.storage.replace(level, &inputs, output);
        for table in &removed {
            if let Err(e) = self.storage.delete_table(table) {
                tracing::warn!(table = %table.path().display(), error = %e, "failed to delete compacted SSTable");
            }
        }

        let outcome = CompactionOutcome {
            level,
            inputs: removed.len(),
            output: output_id,
            records_written: written,
            records_dropped: dropped,
        };
        tracing::debug!(?outcome, "level compacted");
        Ok(Some(outcome))
    }

    /// One pass over levels `0..max_level`, compacting those over the
    /// threshold. Errors abort only the affected level.
    pub fn run_pass(&self) -> Vec<CompactionOutcome> {
        let mut outcomes = Vec::new();
        for level in 0..self.max_level {
            match self.compact_level(level) {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => tracing::error!(level, error = %e, "compaction failed, retrying next pass"),
            }
        }
        outcomes
    }

    /// Start the supervised compaction driver: walks the levels with
    /// `pacing` between them until shutdown.
    pub fn spawn(self: Arc<Self>, listener: ShutdownListener) -> std::io::Result<JoinHandle<()>> {
        spawn_supervised(
            "compactor",
            RestartPolicy::default(),
            listener,
            move |listener: &ShutdownListener| loop {
                for level in 0..self.max_level.max(1) {
                    if let Err(e) = self.compact_level(level) {
                        tracing::error!(level, error = %e, "compaction failed, retrying next pass");
                    }
                    if listener.wait(self.pacing) {
                        return;
                    }
                }
            },
        )
    }
}
