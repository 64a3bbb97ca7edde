//! Record Module
//!
//! The unit of storage shared by the memtable, the WAL, SSTable blocks and
//! the compactor.
//!
//! ## Layout
//! A [`Record`] is a sum type over record families. Only the scalar family
//! exists today; new families get their own variant and are decoded through
//! the same typed serde path.

mod value;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use value::{
    Value, TYPE_BOOL, TYPE_BYTES, TYPE_FLOAT, TYPE_INT, TYPE_LIST, TYPE_MAP, TYPE_NIL, TYPE_STR,
};

/// Expiry sentinel meaning "no TTL"
pub const NO_EXPIRY: i64 = i64::MAX;

/// Current wall-clock time in epoch seconds
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Absolute expiry for a relative TTL (0 means no expiry)
pub fn expiry_from_ttl(ttl_secs: u64, now: i64) -> i64 {
    if ttl_secs == 0 {
        NO_EXPIRY
    } else {
        now.saturating_add(ttl_secs.min(i64::MAX as u64) as i64)
    }
}

/// Logical state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    Active,
    Tombstoned,
}

/// Record of the scalar family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub value: Value,
    pub type_tag: u8,
    /// Epoch seconds of the last write
    pub last_access: i64,
    /// Absolute epoch seconds, or [`NO_EXPIRY`]
    pub expiry: i64,
    pub state: RecordState,
}

impl ScalarRecord {
    pub fn new(value: Value, expiry: i64, state: RecordState) -> Self {
        Self {
            type_tag: value.type_tag(),
            value,
            last_access: now_secs(),
            expiry,
            state,
        }
    }

    pub fn tombstone() -> Self {
        Self::new(Value::Nil, NO_EXPIRY, RecordState::Tombstoned)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry != NO_EXPIRY && now > self.expiry
    }
}

/// A stored record, tagged by family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Scalar(ScalarRecord),
}

impl Record {
    /// Active scalar record
    pub fn scalar(value: Value, expiry: i64) -> Self {
        Record::Scalar(ScalarRecord::new(value, expiry, RecordState::Active))
    }

    pub fn tombstone() -> Self {
        Record::Scalar(ScalarRecord::tombstone())
    }

    pub fn value(&self) -> &Value {
        match self {
            Record::Scalar(r) => &r.value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Record::Scalar(r) => r.value,
        }
    }

    pub fn type_tag(&self) -> u8 {
        match self {
            Record::Scalar(r) => r.type_tag,
        }
    }

    pub fn expiry(&self) -> i64 {
        match self {
            Record::Scalar(r) => r.expiry,
        }
    }

    pub fn state(&self) -> RecordState {
        match self {
            Record::Scalar(r) => r.state,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.state() == RecordState::Tombstoned
    }

    pub fn is_expired(&self, now: i64) -> bool {
        match self {
            Record::Scalar(r) => r.is_expired(now),
        }
    }

    /// Live means neither tombstoned nor expired at `now`
    pub fn is_live(&self, now: i64) -> bool {
        !self.is_tombstone() && !self.is_expired(now)
    }
}

/// A keyed record; batches of these are always sorted by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordKV {
    pub key: String,
    pub record: Record,
}

impl RecordKV {
    pub fn new(key: impl Into<String>, record: Record) -> Self {
        Self {
            key: key.into(),
            record,
        }
    }
}
