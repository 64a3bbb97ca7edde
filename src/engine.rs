//! Engine Module
//!
//! The LSM storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, Storage and compaction
//! - Swap out a full memtable and hand it to the flush worker
//! - Resolve reads across memtable, in-flight tables and SSTable levels
//! - Manage crash recovery on startup

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use crossbeam::select;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{QuillError, Result, StatusCode};
use crate::memtable::{
    FlushHandoff, FrozenMemTable, MemTable, MemTableOptions, MutationLog, OlderVersions,
};
use crate::record::{now_secs, Record, RecordState, Value, NO_EXPIRY};
use crate::storage::{BlockCache, CacheStats, CompactionOutcome, Compactor, StorageManager};
use crate::store::{KvStore, Lookup, Ttl};
use crate::supervisor::{spawn_supervised, RestartPolicy, Shutdown, ShutdownListener};
use crate::wal::{self, ReplayStats, WalWriter};

/// How long `flush` waits for the flush worker to drain
const FLUSH_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// First retry delay of a failed memtable flush; doubles up to the cap
const FLUSH_RETRY_BACKOFF: Duration = Duration::from_millis(50);
const FLUSH_RETRY_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Point-in-time counters reported by [`Engine::stats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub memtable_bytes: usize,
    pub memtable_records: usize,
    /// Retired memtables not yet persisted
    pub in_flight: usize,
    /// SSTables per level, level 0 first
    pub level_tables: Vec<usize>,
    pub cache: CacheStats,
    pub wal_frames: u64,
}

/// Everything below the active memtable: in-flight tables (newest first),
/// then the SSTable levels
struct Underlay {
    handoff: FlushHandoff,
    storage: Arc<StorageManager>,
}

impl OlderVersions for Underlay {
    fn get(&self, key: &str) -> Lookup<Record> {
        for frozen in self.handoff.in_flight() {
            match frozen.get(key) {
                Lookup::NotFound => {}
                decided => return decided,
            }
        }
        match self.storage.get(key) {
            None => Lookup::NotFound,
            Some(record) if record.is_tombstone() => Lookup::Tombstoned,
            Some(record) if record.is_expired(now_secs()) => Lookup::Expired,
            Some(record) => Lookup::Found(record),
        }
    }
}

struct Workers {
    shutdown: Shutdown,
    handles: Vec<JoinHandle<()>>,
}

/// The LSM storage engine
///
/// ## Concurrency Model
/// There is no engine-wide lock. Same-key operations are serialized by the
/// memtable's lock, which is also held while the WAL frame is appended, so
/// replay order equals mutation order. Flushing and compaction run on
/// supervised background threads.
pub struct Engine {
    config: Config,

    /// Directory for SSTables
    storage_dir: PathBuf,

    wal: Arc<WalWriter>,

    /// Active memtable; logs through `wal`, retires into `handoff` and
    /// reads through to `underlay` for read-modify-writes
    memtable: MemTable,

    underlay: Arc<Underlay>,

    handoff: FlushHandoff,

    storage: Arc<StorageManager>,

    compactor: Arc<Compactor>,

    workers: Mutex<Option<Workers>>,

    replay_stats: ReplayStats,

    closed: AtomicBool,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const SSTABLE_DIR: &'static str = "sstables";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data and SSTable directories
    /// 2. Open existing SSTables (unusable ones are logged and skipped)
    /// 3. Replay the WAL into a fresh memtable; a corrupt tail is cut off
    /// 4. Start the flush worker and the compaction driver
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let storage_dir = config.data_dir.join(Self::SSTABLE_DIR);
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);

        let cache = Arc::new(BlockCache::new(
            config.block_cache_bytes,
            config.block_cache_shards,
        ));
        let storage = Arc::new(StorageManager::open(&storage_dir, &config, cache)?);
        let compactor = Arc::new(Compactor::new(Arc::clone(&storage), &config));

        let (handoff, flush_rx, rotate_rx) = FlushHandoff::new(config.flush_queue_capacity);
        let wal = Arc::new(WalWriter::open(&wal_path, config.wal_mode, Some(rotate_rx))?);
        let underlay = Arc::new(Underlay {
            handoff: handoff.clone(),
            storage: Arc::clone(&storage),
        });
        let memtable = MemTable::with_log(
            MemTableOptions::from(&config),
            Arc::clone(&wal) as Arc<dyn MutationLog>,
            handoff.clone(),
        )
        .with_older_versions(Arc::clone(&underlay) as Arc<dyn OlderVersions>);

        let replay_stats = match wal::replay(&wal_path, &memtable) {
            Ok(stats) => stats,
            Err(QuillError::WalCorrupted { offset, reason }) => {
                tracing::error!(
                    path = %wal_path.display(),
                    offset,
                    reason = %reason,
                    "WAL corrupted, keeping the replayed prefix"
                );
                wal::truncate_tail(&wal_path, offset)?;
                ReplayStats {
                    valid_bytes: offset,
                    ..ReplayStats::default()
                }
            }
            Err(e) => return Err(e),
        };

        let mut shutdown = Shutdown::new();
        let handles = match Self::spawn_workers(&shutdown, flush_rx, &storage, &handoff, &compactor) {
            Ok(handles) => handles,
            Err(e) => {
                shutdown.trigger();
                return Err(e.into());
            }
        };

        let engine = Self {
            config,
            storage_dir,
            wal,
            memtable,
            handoff,
            underlay,
            storage,
            compactor,
            workers: Mutex::new(Some(Workers { shutdown, handles })),
            replay_stats,
            closed: AtomicBool::new(false),
        };
        engine.maybe_retire();
        tracing::debug!(
            data_dir = %engine.config.data_dir.display(),
            tables = engine.storage.table_count(),
            replayed = engine.memtable.count(),
            "engine opened"
        );
        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    fn spawn_workers(
        shutdown: &Shutdown,
        flush_rx: Receiver<Arc<FrozenMemTable>>,
        storage: &Arc<StorageManager>,
        handoff: &FlushHandoff,
        compactor: &Arc<Compactor>,
    ) -> std::io::Result<Vec<JoinHandle<()>>> {
        let flusher = {
            let storage = Arc::clone(storage);
            let handoff = handoff.clone();
            spawn_supervised(
                "memtable-flusher",
                RestartPolicy::default(),
                shutdown.listener(),
                move |listener: &ShutdownListener| loop {
                    select! {
                        recv(flush_rx) -> msg => match msg {
                            Ok(frozen) => flush_until_done(&storage, &handoff, &frozen, listener),
                            Err(_) => return,
                        },
                        recv(listener.receiver()) -> _ => return,
                    }
                },
            )?
        };
        let compaction = Arc::clone(compactor).spawn(shutdown.listener())?;
        Ok(vec![flusher, compaction])
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Newest version of `key`: active memtable → in-flight tables (newest
    /// first) → SSTable levels. Deleted keys come back as `Tombstoned`.
    fn lookup(&self, key: &str) -> Lookup<Record> {
        match self.memtable.get(key) {
            Lookup::NotFound => self.underlay.get(key),
            decided => decided,
        }
    }

    // =========================================================================
    // Write path helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QuillError::Closed);
        }
        Ok(())
    }

    /// Retire the memtable if it has reached its limits. The write that
    /// triggered this is already logged and applied, so a stalled flush
    /// queue is reported here and surfaces again from `flush`.
    fn maybe_retire(&self) {
        if let Err(e) = self.memtable.truncate_if_full() {
            tracing::error!(error = %e, "memtable retirement failed");
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Retire the active memtable and wait until every retired memtable has
    /// been written to level 0
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.memtable.truncate()?;
        self.wait_for_flushes()
    }

    fn wait_for_flushes(&self) -> Result<()> {
        let deadline = Instant::now() + FLUSH_WAIT_TIMEOUT;
        while self.handoff.pending() > 0 {
            if self.handoff.is_stalled() {
                return Err(QuillError::FlushStalled(format!(
                    "{} memtables cannot reach the flush worker",
                    self.handoff.pending()
                )));
            }
            if Instant::now() >= deadline {
                return Err(QuillError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("{} memtables still waiting to be flushed", self.handoff.pending()),
                )));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    /// Run one synchronous compaction pass over all levels
    pub fn compact_now(&self) -> Result<Vec<CompactionOutcome>> {
        self.ensure_open()?;
        Ok(self.compactor.run_pass())
    }

    /// Close the engine gracefully: flush the memtable, sync the WAL and
    /// stop the background workers. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let flushed = self.flush();
        self.closed.store(true, Ordering::Release);

        if let Some(mut workers) = self.workers.lock().take() {
            workers.shutdown.trigger();
            for handle in workers.handles {
                let _ = handle.join();
            }
        }
        if flushed.is_ok() && self.memtable.is_empty() {
            // Everything logged so far is in SSTables now.
            self.wal.rotate()?;
        }
        self.wal.close()?;
        flushed
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            memtable_bytes: self.memtable.size(),
            memtable_records: self.memtable.count(),
            in_flight: self.handoff.pending(),
            level_tables: self.storage.level_counts(),
            cache: self.storage.cache().stats(),
            wal_frames: self.wal.frames_appended(),
        }
    }

    /// What the startup WAL replay applied
    pub fn replay_stats(&self) -> ReplayStats {
        self.replay_stats
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the storage directory path (where SSTables are stored)
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn wal_path(&self) -> &Path {
        self.wal.path()
    }

    pub fn sstable_count(&self) -> usize {
        self.storage.table_count()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl KvStore for Engine {
    fn exists(&self, key: &str) -> Result<StatusCode> {
        self.ensure_open()?;
        Ok(match self.lookup(key) {
            Lookup::Found(_) => StatusCode::Found,
            Lookup::Expired => StatusCode::Expired,
            Lookup::NotFound | Lookup::Tombstoned => StatusCode::NotFound,
        })
    }

    fn get(&self, key: &str) -> Result<Lookup<Value>> {
        self.ensure_open()?;
        Ok(match self.lookup(key) {
            Lookup::Tombstoned => Lookup::NotFound,
            other => other.map(Record::into_value),
        })
    }

    fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<StatusCode> {
        self.ensure_open()?;
        let code = self.memtable.set(key, value, ttl_secs, RecordState::Active)?;
        self.maybe_retire();
        Ok(code)
    }

    fn delete(&self, key: &str) -> Result<StatusCode> {
        self.ensure_open()?;
        let code = self.memtable.delete(key)?;
        self.maybe_retire();
        Ok(code)
    }

    fn incr_decr_integer(&self, key: &str, offset: i64, is_incr: bool) -> Result<i64> {
        self.ensure_open()?;
        let next = self.memtable.incr_decr_integer(key, offset, is_incr)?;
        self.maybe_retire();
        Ok(next)
    }

    fn append(&self, key: &str, value: Value) -> Result<Value> {
        self.ensure_open()?;
        let next = self.memtable.append(key, value)?;
        self.maybe_retire();
        Ok(next)
    }

    fn ttl(&self, key: &str) -> Result<Lookup<Ttl>> {
        self.ensure_open()?;
        let now = now_secs();
        Ok(match self.lookup(key) {
            Lookup::Tombstoned => Lookup::NotFound,
            other => other.map(|record| match record.expiry() {
                NO_EXPIRY => Ttl::Persistent,
                expiry => Ttl::Remaining(expiry.saturating_sub(now).max(0) as u64),
            }),
        })
    }

    fn expire(&self, key: &str, ttl_secs: u64) -> Result<StatusCode> {
        self.ensure_open()?;
        let code = match self.memtable.expire(key, ttl_secs)? {
            StatusCode::Tombstoned => StatusCode::NotFound,
            code => code,
        };
        self.maybe_retire();
        Ok(code)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "engine close failed");
        }
    }
}

/// Persist one retired memtable, retrying with backoff until it succeeds or
/// shutdown is requested. The table stays readable (in-flight) until then.
fn flush_until_done(
    storage: &StorageManager,
    handoff: &FlushHandoff,
    frozen: &Arc<FrozenMemTable>,
    listener: &ShutdownListener,
) {
    let mut backoff = FLUSH_RETRY_BACKOFF;
    loop {
        match storage.flush_frozen(frozen) {
            Ok(_) => {
                handoff.complete(frozen);
                return;
            }
            Err(e) => {
                tracing::warn!(
                    generation = frozen.generation(),
                    error = %e,
                    "memtable flush failed, backing off"
                );
                if listener.wait(backoff) {
                    tracing::error!(
                        generation = frozen.generation(),
                        "shutdown with an unflushed memtable"
                    );
                    return;
                }
                backoff = (backoff * 2).min(FLUSH_RETRY_BACKOFF_MAX);
            }
        }
    }
}
