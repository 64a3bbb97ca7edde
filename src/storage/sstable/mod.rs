//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted record storage.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Data Blocks (variable)                                  │
//! │   [stored payload][CRC32: u32 BE]  ... per block ...    │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (codec)                                     │
//! │   Vec<IndexEntry { first_key, last_key, offset, size }> │
//! ├─────────────────────────────────────────────────────────┤
//! │ Bloom Block (codec)                                     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Metadata (big-endian fixed fields)                      │
//! │   version, ids, counts, section sizes, timestamp,       │
//! │   [tag len u16][compression tag], checksum, index crc   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Trailer (8 bytes)                                       │
//! │   Metadata length: u32 BE (4) | Magic: "QKVT" (4)       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! Files are named `L{level}-{id:06}.sst`.

mod builder;
mod iterator;
mod metadata;
mod reader;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use builder::{SSTableOptions, SSTableWriter};
pub use iterator::SSTableIterator;
pub use metadata::SSTableMetadata;
pub use reader::SSTable;

// =============================================================================
// Shared Constants (used by builder, reader, metadata)
// =============================================================================

/// Magic bytes closing every QuillKV SSTable file
pub(crate) const MAGIC: &[u8; 4] = b"QKVT";

/// Current SSTable format version
pub(crate) const VERSION: u16 = 1;

/// Trailer size: MetadataLen (4) + Magic (4)
pub(crate) const TRAILER_SIZE: u64 = 8;

/// Extension of finished tables
pub(crate) const EXTENSION: &str = "sst";

/// Sparse index entry: one per block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub first_key: String,
    pub last_key: String,
    /// Offset of the block's first byte
    pub offset: u64,
    /// Stored size, checksum included
    pub size: u64,
    pub count: u32,
}

impl IndexEntry {
    pub fn contains(&self, key: &str) -> bool {
        self.first_key.as_str() <= key && key <= self.last_key.as_str()
    }
}

/// `{dir}/L{level}-{id:06}.sst`
pub fn table_path(dir: &Path, level: usize, id: u64) -> PathBuf {
    dir.join(format!("L{}-{:06}.{}", level, id, EXTENSION))
}

/// Parse `(level, id)` out of a table file name
pub fn parse_table_name(path: &Path) -> Option<(usize, u64)> {
    if path.extension()? != EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (level, id) = stem.strip_prefix('L')?.split_once('-')?;
    Some((level.parse().ok()?, id.parse().ok()?))
}
