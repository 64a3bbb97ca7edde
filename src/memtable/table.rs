//! MemTable implementation
//!
//! One `RwLock` guards the ordered index, the bloom filter and the per-key
//! size map together; every public operation holds it for its whole critical
//! section.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bloom::BloomFilter;
use crate::codec;
use crate::error::{Result, StatusCode};
use crate::record::{
    expiry_from_ttl, now_secs, Record, RecordKV, RecordState, ScalarRecord, Value, NO_EXPIRY,
};
use crate::store::{self, rmw, BatchOutcome, Lookup, Ttl};

use super::{
    new_index, FlushHandoff, FrozenMemTable, MemTableOptions, MutationLog, OlderVersions,
    OrderedIndex,
};

struct Inner {
    index: Box<dyn OrderedIndex>,
    bloom: BloomFilter,
    /// key → accounted bytes, so overwrites adjust `size` by the delta
    sizes: HashMap<String, usize>,
    size: usize,
    generation: u64,
}

impl Inner {
    fn new(options: &MemTableOptions, generation: u64) -> Self {
        Self {
            index: new_index(options.kind),
            bloom: BloomFilter::new(options.max_records, options.bloom_false_positive_rate),
            sizes: HashMap::new(),
            size: 0,
            generation,
        }
    }
}

/// In-memory sorted write buffer
pub struct MemTable {
    inner: RwLock<Inner>,
    options: MemTableOptions,
    log: Option<Arc<dyn MutationLog>>,
    handoff: Option<FlushHandoff>,
    older: Option<Arc<dyn OlderVersions>>,
}

impl MemTable {
    /// Create a standalone memtable (no log, no flush handoff)
    pub fn new(options: MemTableOptions) -> Self {
        Self {
            inner: RwLock::new(Inner::new(&options, 0)),
            options,
            log: None,
            handoff: None,
            older: None,
        }
    }

    /// Create a memtable whose mutations go through `log` and whose
    /// truncations are handed to the flush worker
    pub fn with_log(
        options: MemTableOptions,
        log: Arc<dyn MutationLog>,
        handoff: FlushHandoff,
    ) -> Self {
        Self {
            inner: RwLock::new(Inner::new(&options, 0)),
            options,
            log: Some(log),
            handoff: Some(handoff),
            older: None,
        }
    }

    /// Let read-modify-writes of keys this table holds nothing for start
    /// from `older`
    pub fn with_older_versions(mut self, older: Arc<dyn OlderVersions>) -> Self {
        self.older = Some(older);
        self
    }

    pub fn options(&self) -> &MemTableOptions {
        &self.options
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// `Found`, `NotFound` or `Expired`; tombstoned keys do not exist
    pub fn exists(&self, key: &str) -> StatusCode {
        match self.get(key) {
            Lookup::Found(_) => StatusCode::Found,
            Lookup::Expired => StatusCode::Expired,
            Lookup::NotFound | Lookup::Tombstoned => StatusCode::NotFound,
        }
    }

    /// Point lookup. An expired hit is evicted (replaced by a tombstone).
    pub fn get(&self, key: &str) -> Lookup<Record> {
        let now = now_secs();
        {
            let inner = self.inner.read();
            if !inner.bloom.may_contain(key.as_bytes()) {
                return Lookup::NotFound;
            }
            match inner.index.get(key) {
                None => return Lookup::NotFound,
                Some(record) if record.is_tombstone() => return Lookup::Tombstoned,
                Some(record) if !record.is_expired(now) => return Lookup::Found(record),
                Some(_) => {}
            }
        }
        self.evict_expired(key, now);
        Lookup::Expired
    }

    fn evict_expired(&self, key: &str, now: i64) {
        let mut inner = self.inner.write();
        let still_expired = inner
            .index
            .get(key)
            .map(|r| !r.is_tombstone() && r.is_expired(now))
            .unwrap_or(false);
        if still_expired {
            // Replay tombstones elapsed entries on its own, so the eviction is not logged.
            if let Err(e) = self.apply(&mut inner, key, Record::tombstone(), false) {
                tracing::warn!(key, error = %e, "failed to evict expired entry");
            }
        }
    }

    pub fn ttl(&self, key: &str) -> Lookup<Ttl> {
        let inner = self.inner.read();
        match inner.index.get(key) {
            None => Lookup::NotFound,
            Some(record) if record.is_tombstone() => Lookup::Tombstoned,
            Some(record) => remaining_ttl(&record, now_secs()),
        }
    }

    pub fn mget(&self, keys: &[&str]) -> BatchOutcome<Lookup<Record>> {
        let results = keys.iter().map(|k| (k.to_string(), self.get(k))).collect();
        BatchOutcome::collect(StatusCode::Found, results, |l| l.is_found())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or overwrite `key`. `ttl_secs == 0` means no expiry.
    pub fn set(
        &self,
        key: &str,
        value: Value,
        ttl_secs: u64,
        state: RecordState,
    ) -> Result<StatusCode> {
        let record = self.build_record(value, ttl_secs, state)?;
        let mut inner = self.inner.write();
        self.apply(&mut inner, key, record, true)?;
        Ok(StatusCode::Updated)
    }

    /// Tombstone `key`
    pub fn delete(&self, key: &str) -> Result<StatusCode> {
        self.set(key, Value::Nil, 0, RecordState::Tombstoned)
    }

    pub fn mset(&self, entries: Vec<(String, Value, u64)>) -> BatchOutcome<StatusCode> {
        let results = entries
            .into_iter()
            .map(|(key, value, ttl)| {
                let code = self
                    .set(&key, value, ttl, RecordState::Active)
                    .unwrap_or_else(|e| e.status());
                (key, code)
            })
            .collect();
        BatchOutcome::collect(StatusCode::Updated, results, |c| c.is_success())
    }

    pub fn mdelete(&self, keys: &[&str]) -> BatchOutcome<StatusCode> {
        let results = keys
            .iter()
            .map(|key| {
                let code = self.delete(key).unwrap_or_else(|e| e.status());
                (key.to_string(), code)
            })
            .collect();
        BatchOutcome::collect(StatusCode::Updated, results, |c| c.is_success())
    }

    /// Atomic increment/decrement; a missing key counts as 0. The stored
    /// expiry is kept.
    pub fn incr_decr_integer(&self, key: &str, offset: i64, is_incr: bool) -> Result<i64> {
        let mut inner = self.inner.write();
        let current = self.rmw_base(&inner, key, now_secs());
        let next = rmw::incr(current.as_ref().map(|r| r.value()), offset, is_incr)?;
        let expiry = current.map(|r| r.expiry()).unwrap_or(NO_EXPIRY);
        self.apply(&mut inner, key, Record::scalar(Value::Int(next), expiry), true)?;
        Ok(next)
    }

    /// Atomic append to a string or byte value; returns the new value
    pub fn append(&self, key: &str, suffix: Value) -> Result<Value> {
        let mut inner = self.inner.write();
        let current = self.rmw_base(&inner, key, now_secs());
        let next = rmw::append(current.as_ref().map(|r| r.value()), &suffix)?;
        store::validate_value(&next, self.options.max_value_bytes)?;
        let expiry = current.map(|r| r.expiry()).unwrap_or(NO_EXPIRY);
        self.apply(&mut inner, key, Record::scalar(next.clone(), expiry), true)?;
        Ok(next)
    }

    /// Re-arm the expiry of a live key; `ttl_secs == 0` makes it persistent
    pub fn expire(&self, key: &str, ttl_secs: u64) -> Result<StatusCode> {
        let now = now_secs();
        let mut inner = self.inner.write();
        let current = match inner.index.get(key) {
            Some(r) => Lookup::Found(r),
            None => self.older_version(key),
        };
        let record = match current {
            Lookup::Found(r) if r.is_tombstone() => return Ok(StatusCode::Tombstoned),
            Lookup::Found(r) if r.is_expired(now) => return Ok(StatusCode::Expired),
            Lookup::Found(r) => r,
            Lookup::Expired => return Ok(StatusCode::Expired),
            Lookup::Tombstoned => return Ok(StatusCode::Tombstoned),
            Lookup::NotFound => return Ok(StatusCode::NotFound),
        };
        let rearmed = Record::scalar(record.into_value(), expiry_from_ttl(ttl_secs, now));
        self.apply(&mut inner, key, rearmed, true)?;
        Ok(StatusCode::Updated)
    }

    // =========================================================================
    // Replay (unlogged)
    // =========================================================================

    /// Re-apply a logged SET with its remaining TTL
    pub fn restore_set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<()> {
        let record = self.build_record(value, ttl_secs, RecordState::Active)?;
        let mut inner = self.inner.write();
        self.apply(&mut inner, key, record, false)
    }

    /// Re-apply a logged DELETE
    pub fn restore_delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write();
        self.apply(&mut inner, key, Record::tombstone(), false)
    }

    // =========================================================================
    // Size / Snapshots / Truncation
    // =========================================================================

    /// Accounted size in bytes (keys plus encoded records)
    pub fn size(&self) -> usize {
        self.inner.read().size
    }

    /// Entry count, tombstones included
    pub fn count(&self) -> usize {
        self.inner.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.read();
        inner.size >= self.options.max_bytes || inner.index.len() >= self.options.max_records
    }

    /// Live entries in key order (no tombstones, nothing expired)
    pub fn get_all(&self) -> Vec<RecordKV> {
        let now = now_secs();
        let inner = self.inner.read();
        inner
            .index
            .entries()
            .into_iter()
            .filter(|kv| kv.record.is_live(now))
            .collect()
    }

    /// Every entry in key order, expired ones turned into tombstones
    pub fn snapshot(&self) -> Vec<RecordKV> {
        let inner = self.inner.read();
        tombstone_expired(inner.index.entries(), now_secs())
    }

    /// Swap in an empty structure and bloom filter.
    ///
    /// The retired structure is frozen, handed to the flush worker (when a
    /// handoff is attached) and returned. WAL rotation is signalled in the
    /// same critical section so no write can land in between.
    ///
    /// Fails with `FlushStalled` when the retired table cannot be queued; it
    /// then stays readable through the handoff's in-flight list.
    pub fn truncate(&self) -> Result<Option<Arc<FrozenMemTable>>> {
        let mut inner = self.inner.write();
        self.retire(&mut inner)
    }

    /// [`MemTable::truncate`], but only if the size or entry limit has been
    /// reached. The check and the swap happen under one lock acquisition.
    pub fn truncate_if_full(&self) -> Result<Option<Arc<FrozenMemTable>>> {
        let mut inner = self.inner.write();
        if inner.size < self.options.max_bytes && inner.index.len() < self.options.max_records {
            return Ok(None);
        }
        self.retire(&mut inner)
    }

    fn retire(&self, inner: &mut Inner) -> Result<Option<Arc<FrozenMemTable>>> {
        if inner.index.is_empty() {
            return Ok(None);
        }
        let generation = inner.generation + 1;
        let retired = std::mem::replace(&mut *inner, Inner::new(&self.options, generation));
        let frozen = Arc::new(FrozenMemTable::new(
            generation,
            retired.index,
            retired.bloom,
            retired.size,
        ));
        tracing::debug!(
            generation,
            entries = frozen.len(),
            bytes = frozen.size(),
            "memtable truncated"
        );
        if let Some(handoff) = &self.handoff {
            handoff.submit(Arc::clone(&frozen))?;
        }
        Ok(Some(frozen))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Base value of a read-modify-write: this table's entry when it has
    /// one, otherwise the newest older version. Called with the write lock
    /// held, so no truncation can slip between the read and the update.
    fn rmw_base(&self, inner: &Inner, key: &str, now: i64) -> Option<Record> {
        let record = match inner.index.get(key) {
            Some(record) => record,
            None => match self.older_version(key) {
                Lookup::Found(record) => record,
                _ => return None,
            },
        };
        Some(record).filter(|r| r.is_live(now))
    }

    fn older_version(&self, key: &str) -> Lookup<Record> {
        self.older
            .as_ref()
            .map_or(Lookup::NotFound, |older| older.get(key))
    }

    fn build_record(&self, value: Value, ttl_secs: u64, state: RecordState) -> Result<Record> {
        if state == RecordState::Tombstoned {
            return Ok(Record::tombstone());
        }
        store::validate_value(&value, self.options.max_value_bytes)?;
        let expiry = expiry_from_ttl(ttl_secs, now_secs());
        Ok(Record::Scalar(ScalarRecord::new(value, expiry, state)))
    }

    /// Log (optionally) then install `record`, keeping the size accounting
    /// and bloom filter in step. Called with the write lock held.
    fn apply(&self, inner: &mut Inner, key: &str, record: Record, logged: bool) -> Result<()> {
        let entry_size = key.len() + codec::encoded_size(&record)?;
        if logged {
            if let Some(log) = &self.log {
                log.log(key, &record)?;
            }
        }
        let previous = inner.sizes.insert(key.to_string(), entry_size).unwrap_or(0);
        inner.size = inner.size + entry_size - previous;
        inner.bloom.insert(key.as_bytes());
        inner.index.insert(key.to_string(), record);
        Ok(())
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new(MemTableOptions::default())
    }
}

fn remaining_ttl(record: &Record, now: i64) -> Lookup<Ttl> {
    let expiry = record.expiry();
    if expiry == NO_EXPIRY {
        Lookup::Found(Ttl::Persistent)
    } else if now > expiry {
        Lookup::Expired
    } else {
        Lookup::Found(Ttl::Remaining((expiry - now) as u64))
    }
}

pub(super) fn tombstone_expired(entries: Vec<RecordKV>, now: i64) -> Vec<RecordKV> {
    entries
        .into_iter()
        .map(|kv| {
            if !kv.record.is_tombstone() && kv.record.is_expired(now) {
                RecordKV::new(kv.key, Record::tombstone())
            } else {
                kv
            }
        })
        .collect()
}
