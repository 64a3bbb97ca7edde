//! MemTable Module
//!
//! In-memory sorted write buffer for recent writes.
//!
//! ## Responsibilities
//! - Fast point reads and writes with a bloom filter in front
//! - Per-key incremental size tracking for flush triggers
//! - Atomic read-modify-write (incr/decr, append, expire)
//! - Ordered snapshots for SSTable creation
//! - Swapping itself out for an empty table when full
//!
//! ## Backends
//! The ordered structure is either a skip list or a balanced tree
//! ([`crate::config::MemTableKind`]). Both tombstone on delete, so a deleted
//! key keeps shadowing older versions living in SSTables until compaction.

mod frozen;
mod index;
mod table;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use parking_lot::RwLock;

use crate::config::{Config, MemTableKind};
use crate::error::{QuillError, Result};
use crate::record::Record;
use crate::store::Lookup;

pub use frozen::FrozenMemTable;
pub use index::{new_index, OrderedIndex, SkipListIndex, TreeIndex};
pub use table::MemTable;

/// Sink for mutations that must be durable before they are applied.
///
/// The memtable calls [`MutationLog::log`] while holding its write lock, so
/// the log sees mutations in exactly the order the memtable applies them.
pub trait MutationLog: Send + Sync {
    fn log(&self, key: &str, record: &Record) -> Result<()>;
}

/// Versions of a key older than anything the active memtable holds.
///
/// Read-modify-writes consult this while holding the memtable write lock
/// when the table has no entry for the key, so the base value and the update
/// land in one critical section. `Tombstoned` and `Expired` both start the
/// update from nothing.
pub trait OlderVersions: Send + Sync {
    fn get(&self, key: &str) -> Lookup<Record>;
}

/// How long a retiring memtable waits for room in the flush queue
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sizing and validation knobs of a memtable
#[derive(Debug, Clone, Copy)]
pub struct MemTableOptions {
    pub kind: MemTableKind,
    pub max_bytes: usize,
    pub max_records: usize,
    pub bloom_false_positive_rate: f64,
    pub max_value_bytes: usize,
}

impl Default for MemTableOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for MemTableOptions {
    fn from(config: &Config) -> Self {
        Self {
            kind: config.memtable_kind,
            max_bytes: config.memtable_max_bytes,
            max_records: config.memtable_max_records,
            bloom_false_positive_rate: config.bloom_false_positive_rate,
            max_value_bytes: config.max_value_bytes,
        }
    }
}

/// Handoff from a truncating memtable to the flush worker.
///
/// Retired tables are queued for flushing and stay listed as in-flight (and
/// therefore readable) until the worker calls [`FlushHandoff::complete`].
///
/// A table that cannot be queued (the worker is gone, or the queue stayed
/// full for the whole timeout) marks the handoff as stalled. It stays
/// readable in memory, and WAL rotation is suppressed from then on so the
/// log keeps every mutation the table holds.
#[derive(Clone)]
pub struct FlushHandoff {
    queue: Sender<Arc<FrozenMemTable>>,
    rotate: Sender<()>,
    in_flight: Arc<RwLock<Vec<Arc<FrozenMemTable>>>>,
    stalled: Arc<AtomicBool>,
    timeout: Duration,
}

impl FlushHandoff {
    /// Returns the handoff plus the flush queue and WAL-rotation receivers
    pub fn new(capacity: usize) -> (Self, Receiver<Arc<FrozenMemTable>>, Receiver<()>) {
        Self::with_timeout(capacity, SUBMIT_TIMEOUT)
    }

    /// Like [`FlushHandoff::new`] with a custom queueing timeout
    pub fn with_timeout(
        capacity: usize,
        timeout: Duration,
    ) -> (Self, Receiver<Arc<FrozenMemTable>>, Receiver<()>) {
        let (queue, flush_rx) = channel::bounded(capacity.max(1));
        // Rotation requests coalesce: one pending signal is enough.
        let (rotate, rotate_rx) = channel::bounded(1);
        let handoff = Self {
            queue,
            rotate,
            in_flight: Arc::new(RwLock::new(Vec::new())),
            stalled: Arc::new(AtomicBool::new(false)),
            timeout,
        };
        (handoff, flush_rx, rotate_rx)
    }

    pub(crate) fn submit(&self, frozen: Arc<FrozenMemTable>) -> Result<()> {
        let generation = frozen.generation();
        self.in_flight.write().push(Arc::clone(&frozen));
        let reason = match self.queue.send_timeout(frozen, self.timeout) {
            Ok(()) => {
                if !self.is_stalled() {
                    let _ = self.rotate.try_send(());
                }
                return Ok(());
            }
            Err(SendTimeoutError::Timeout(_)) => "flush queue stayed full",
            Err(SendTimeoutError::Disconnected(_)) => "flush worker is gone",
        };
        self.stalled.store(true, Ordering::Release);
        tracing::error!(generation, reason, "retired memtable not queued, WAL rotation suspended");
        Err(QuillError::FlushStalled(format!(
            "memtable generation {}: {}",
            generation, reason
        )))
    }

    /// Whether a retired table could not be queued
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire)
    }

    /// In-flight tables, newest first
    pub fn in_flight(&self) -> Vec<Arc<FrozenMemTable>> {
        self.in_flight.read().iter().rev().cloned().collect()
    }

    pub fn pending(&self) -> usize {
        self.in_flight.read().len()
    }

    /// Drop a flushed table from the in-flight list
    pub fn complete(&self, frozen: &Arc<FrozenMemTable>) {
        self.in_flight.write().retain(|f| !Arc::ptr_eq(f, frozen));
    }
}
