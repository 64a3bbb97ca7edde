//! WAL Recovery
//!
//! Replays a WAL file into a fresh memtable after a restart.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::Result;
use crate::memtable::MemTable;
use crate::record::{now_secs, NO_EXPIRY};

use super::{WalOp, WalReader};

/// Result of a replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied_sets: u64,
    pub applied_deletes: u64,
    /// SETs whose expiry had already elapsed; each is replayed as a
    /// tombstone so it keeps shadowing older on-disk versions
    pub skipped_expired: u64,
    /// Length of the well-formed prefix of the file
    pub valid_bytes: u64,
}

/// Replay every frame of `path` into `memtable` without logging.
///
/// A SET is re-applied with its remaining TTL (at least one second); one
/// whose expiry has passed becomes a tombstone. On a corrupt frame the entries before
/// it stay applied and the `WalCorrupted` error is returned; callers read
/// the prefix length from the error offset.
pub fn replay(path: &Path, memtable: &MemTable) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    if !path.exists() {
        return Ok(stats);
    }

    let mut reader = WalReader::open(path)?;
    let now = now_secs();
    while let Some(command) = reader.next_command()? {
        match command.op() {
            WalOp::Set => {
                let ttl = if command.expiry == NO_EXPIRY {
                    0
                } else if now > command.expiry {
                    memtable.restore_delete(&command.key)?;
                    stats.skipped_expired += 1;
                    stats.valid_bytes = reader.offset();
                    continue;
                } else {
                    (command.expiry - now).max(1) as u64
                };
                if let Err(e) = memtable.restore_set(&command.key, command.value, ttl) {
                    tracing::warn!(key = %command.key, error = %e, "skipping unreplayable WAL entry");
                } else {
                    stats.applied_sets += 1;
                }
            }
            WalOp::Delete => {
                memtable.restore_delete(&command.key)?;
                stats.applied_deletes += 1;
            }
        }
        stats.valid_bytes = reader.offset();
    }

    tracing::debug!(
        sets = stats.applied_sets,
        deletes = stats.applied_deletes,
        skipped = stats.skipped_expired,
        "WAL replayed"
    );
    Ok(stats)
}

/// Cut the file back to its first `valid_len` bytes
pub fn truncate_tail(path: &Path, valid_len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(valid_len)?;
    file.sync_all()?;
    tracing::warn!(path = %path.display(), valid_len, "WAL truncated to last valid frame");
    Ok(())
}

/// Count frames without applying them; fails on the first corrupt frame
pub fn verify(path: &Path) -> Result<u64> {
    let mut frames = 0;
    for command in WalReader::open(path)? {
        command?;
        frames += 1;
    }
    Ok(frames)
}
