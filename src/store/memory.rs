//! In-memory backend
//!
//! Keys are spread over independently locked hash-map shards. Expiry is
//! lazy (an expired key is removed by the read that notices it) and deletes
//! are hard removals; nothing is persisted.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::bloom::{fnv1a_64, FNV_OFFSET_BASIS};
use crate::error::{Result, StatusCode};
use crate::record::{expiry_from_ttl, now_secs, RecordState, ScalarRecord, Value, NO_EXPIRY};

use super::{rmw, validate_value, KvStore, Lookup, Ttl};

type Shard = RwLock<HashMap<String, ScalarRecord>>;

/// Sharded in-memory key-value store
pub struct MemoryStore {
    shards: Vec<Shard>,
    max_value_bytes: usize,
}

impl MemoryStore {
    pub fn new(shard_count: usize, max_value_bytes: usize) -> Self {
        Self {
            shards: (0..shard_count.max(1))
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            max_value_bytes,
        }
    }

    fn shard(&self, key: &str) -> &Shard {
        let hash = fnv1a_64(key.as_bytes(), FNV_OFFSET_BASIS);
        &self.shards[(hash % self.shards.len() as u64) as usize]
    }

    /// Live keys across all shards
    pub fn len(&self) -> usize {
        let now = now_secs();
        self.shards
            .iter()
            .map(|s| s.read().values().filter(|r| !r.is_expired(now)).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired key; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = now_secs();
        self.shards
            .iter()
            .map(|shard| {
                let mut map = shard.write();
                let before = map.len();
                map.retain(|_, r| !r.is_expired(now));
                before - map.len()
            })
            .sum()
    }

    /// Live value of `key`, removing it if it has expired
    fn live(map: &mut HashMap<String, ScalarRecord>, key: &str, now: i64) -> Option<ScalarRecord> {
        if map.get(key).is_some_and(|r| r.is_expired(now)) {
            map.remove(key);
            return None;
        }
        map.get(key).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(64, crate::Config::default().max_value_bytes)
    }
}

impl KvStore for MemoryStore {
    fn exists(&self, key: &str) -> Result<StatusCode> {
        Ok(self.get(key)?.status())
    }

    fn get(&self, key: &str) -> Result<Lookup<Value>> {
        let now = now_secs();
        {
            let map = self.shard(key).read();
            match map.get(key) {
                None => return Ok(Lookup::NotFound),
                Some(r) if !r.is_expired(now) => return Ok(Lookup::Found(r.value.clone())),
                Some(_) => {}
            }
        }
        let mut map = self.shard(key).write();
        if map.get(key).is_some_and(|r| r.is_expired(now)) {
            map.remove(key);
        }
        Ok(Lookup::Expired)
    }

    fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<StatusCode> {
        validate_value(&value, self.max_value_bytes)?;
        let record = ScalarRecord::new(value, expiry_from_ttl(ttl_secs, now_secs()), RecordState::Active);
        self.shard(key).write().insert(key.to_string(), record);
        Ok(StatusCode::Updated)
    }

    fn delete(&self, key: &str) -> Result<StatusCode> {
        self.shard(key).write().remove(key);
        Ok(StatusCode::Updated)
    }

    fn incr_decr_integer(&self, key: &str, offset: i64, is_incr: bool) -> Result<i64> {
        let mut map = self.shard(key).write();
        let current = Self::live(&mut map, key, now_secs());
        let next = rmw::incr(current.as_ref().map(|r| &r.value), offset, is_incr)?;
        let expiry = current.map(|r| r.expiry).unwrap_or(NO_EXPIRY);
        map.insert(
            key.to_string(),
            ScalarRecord::new(Value::Int(next), expiry, RecordState::Active),
        );
        Ok(next)
    }

    fn append(&self, key: &str, value: Value) -> Result<Value> {
        let mut map = self.shard(key).write();
        let current = Self::live(&mut map, key, now_secs());
        let next = rmw::append(current.as_ref().map(|r| &r.value), &value)?;
        validate_value(&next, self.max_value_bytes)?;
        let expiry = current.map(|r| r.expiry).unwrap_or(NO_EXPIRY);
        map.insert(
            key.to_string(),
            ScalarRecord::new(next.clone(), expiry, RecordState::Active),
        );
        Ok(next)
    }

    fn ttl(&self, key: &str) -> Result<Lookup<Ttl>> {
        let now = now_secs();
        let map = self.shard(key).read();
        Ok(match map.get(key) {
            None => Lookup::NotFound,
            Some(r) if r.expiry == NO_EXPIRY => Lookup::Found(Ttl::Persistent),
            Some(r) if r.is_expired(now) => Lookup::Expired,
            Some(r) => Lookup::Found(Ttl::Remaining((r.expiry - now) as u64)),
        })
    }

    fn expire(&self, key: &str, ttl_secs: u64) -> Result<StatusCode> {
        let now = now_secs();
        let mut map = self.shard(key).write();
        if map.get(key).is_some_and(|r| r.is_expired(now)) {
            map.remove(key);
            return Ok(StatusCode::Expired);
        }
        match map.get_mut(key) {
            None => Ok(StatusCode::NotFound),
            Some(r) => {
                r.expiry = expiry_from_ttl(ttl_secs, now);
                r.last_access = now;
                Ok(StatusCode::Updated)
            }
        }
    }
}
