//! Store Module
//!
//! The capability set every backend satisfies, and the result types shared
//! by the memtable and the backends.
//!
//! ## Backends
//! - [`MemoryStore`]: sharded in-memory map, no persistence
//! - [`crate::Engine`]: the LSM engine (WAL + memtable + SSTables)

mod memory;

pub use memory::MemoryStore;

use crate::error::{Result, StatusCode};
use crate::record::Value;

/// Outcome of a point read
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Expired,
    Tombstoned,
}

impl<T> Lookup<T> {
    pub fn status(&self) -> StatusCode {
        match self {
            Lookup::Found(_) => StatusCode::Found,
            Lookup::NotFound => StatusCode::NotFound,
            Lookup::Expired => StatusCode::Expired,
            Lookup::Tombstoned => StatusCode::Tombstoned,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// The found value, if any
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::Expired => Lookup::Expired,
            Lookup::Tombstoned => Lookup::Tombstoned,
        }
    }
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No expiry set
    Persistent,
    /// Seconds left before expiry
    Remaining(u64),
}

/// Aggregate result of a batch operation
///
/// `code` is `Found`/`Updated` when every key succeeded and
/// `PartialFailure` otherwise; `results` holds one entry per key, in input
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<T> {
    pub code: StatusCode,
    pub results: Vec<(String, T)>,
}

impl<T> BatchOutcome<T> {
    pub(crate) fn collect(
        success: StatusCode,
        results: Vec<(String, T)>,
        ok: impl Fn(&T) -> bool,
    ) -> Self {
        let code = if results.iter().all(|(_, r)| ok(r)) {
            success
        } else {
            StatusCode::PartialFailure
        };
        Self { code, results }
    }
}

/// Capability set shared by all backends
///
/// Reads report absence and expiry through [`Lookup`]; validation and I/O
/// failures come back as errors. Batch variants apply every key
/// independently.
pub trait KvStore: Send + Sync {
    /// `Found`, `NotFound` or `Expired`; a deleted key does not exist
    fn exists(&self, key: &str) -> Result<StatusCode>;

    fn get(&self, key: &str) -> Result<Lookup<Value>>;

    /// Insert or overwrite; `ttl_secs == 0` means no expiry
    fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<StatusCode>;

    fn delete(&self, key: &str) -> Result<StatusCode>;

    /// Atomically add (or subtract) `offset`; a missing key counts as 0
    fn incr_decr_integer(&self, key: &str, offset: i64, is_incr: bool) -> Result<i64>;

    /// Atomically append to a string or byte value; a missing key counts as empty
    fn append(&self, key: &str, value: Value) -> Result<Value>;

    fn ttl(&self, key: &str) -> Result<Lookup<Ttl>>;

    /// Re-arm expiry; `ttl_secs == 0` removes it
    fn expire(&self, key: &str, ttl_secs: u64) -> Result<StatusCode>;

    fn mget(&self, keys: &[&str]) -> Result<BatchOutcome<Lookup<Value>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let lookup = self.get(key)?;
            results.push((key.to_string(), lookup));
        }
        Ok(BatchOutcome::collect(StatusCode::Found, results, |l| {
            l.is_found()
        }))
    }

    fn mset(&self, entries: Vec<(String, Value, u64)>) -> Result<BatchOutcome<StatusCode>> {
        let results = entries
            .into_iter()
            .map(|(key, value, ttl)| {
                let code = self.set(&key, value, ttl).unwrap_or_else(|e| e.status());
                (key, code)
            })
            .collect();
        Ok(BatchOutcome::collect(StatusCode::Updated, results, |c| {
            c.is_success()
        }))
    }

    fn mdelete(&self, keys: &[&str]) -> Result<BatchOutcome<StatusCode>> {
        let results = keys
            .iter()
            .map(|key| {
                let code = self.delete(key).unwrap_or_else(|e| e.status());
                (key.to_string(), code)
            })
            .collect();
        Ok(BatchOutcome::collect(StatusCode::Updated, results, |c| {
            c.is_success()
        }))
    }
}

/// Shared validation for writes of `value`
pub(crate) fn validate_value(value: &Value, max_value_bytes: usize) -> Result<()> {
    if !value.is_writable_scalar() {
        return Err(crate::QuillError::InvalidDatatype(format!(
            "{} values cannot be stored",
            value.type_name()
        )));
    }
    let size = crate::codec::encoded_size(value)?;
    if size > max_value_bytes {
        return Err(crate::QuillError::RecordTooBig {
            size,
            max: max_value_bytes,
        });
    }
    Ok(())
}

/// Read-modify-write helpers shared by every backend
pub(crate) mod rmw {
    use crate::error::{QuillError, Result};
    use crate::record::Value;

    /// `base` is `None` when the key is absent, expired or deleted
    pub fn incr(base: Option<&Value>, offset: i64, is_incr: bool) -> Result<i64> {
        let current = match base {
            None => 0,
            Some(Value::Int(i)) => *i,
            Some(other) => {
                return Err(QuillError::IncrTypeMismatch(format!(
                    "expected int, found {}",
                    other.type_name()
                )))
            }
        };
        let next = if is_incr {
            current.checked_add(offset)
        } else {
            current.checked_sub(offset)
        };
        next.ok_or_else(|| QuillError::IncrTypeMismatch("integer overflow".to_string()))
    }

    pub fn append(base: Option<&Value>, suffix: &Value) -> Result<Value> {
        match (base, suffix) {
            (None, Value::Str(s)) => Ok(Value::Str(s.clone())),
            (None, Value::Bytes(b)) => Ok(Value::Bytes(b.clone())),
            (Some(Value::Str(a)), Value::Str(s)) => Ok(Value::Str(format!("{}{}", a, s))),
            (Some(Value::Bytes(a)), Value::Bytes(b)) => {
                let mut out = a.clone();
                out.extend_from_slice(b);
                Ok(Value::Bytes(out))
            }
            (Some(stored), suffix) => Err(QuillError::IncrTypeMismatch(format!(
                "cannot append {} to {}",
                suffix.type_name(),
                stored.type_name()
            ))),
            (None, suffix) => Err(QuillError::IncrTypeMismatch(format!(
                "cannot append {}",
                suffix.type_name()
            ))),
        }
    }
}
