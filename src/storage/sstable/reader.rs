//! SSTable Reader
//!
//! Opens SSTable files and serves point lookups through the sparse index,
//! the bloom filter and the shared block cache.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bloom::BloomFilter;
use crate::codec;
use crate::error::{QuillError, Result};
use crate::record::Record;
use crate::storage::block::Block;
use crate::storage::cache::{block_id, BlockCache};
use crate::storage::compression::{compressor_for, Compressor};

use super::iterator::SSTableIterator;
use super::{IndexEntry, SSTableMetadata, MAGIC, TRAILER_SIZE};

/// An open, immutable SSTable
///
/// The index and bloom filter are loaded eagerly; blocks are read on demand.
pub struct SSTable {
    path: PathBuf,
    metadata: SSTableMetadata,
    index: Vec<IndexEntry>,
    /// Cache id of each block, parallel to `index`
    block_ids: Vec<u64>,
    bloom: BloomFilter,
    compressor: Box<dyn Compressor>,
    file: Mutex<File>,
    cache: Option<Arc<BlockCache>>,
}

impl SSTable {
    /// Open a table. Anything wrong with the trailer, metadata, index or
    /// bloom block makes the table `SSTableUnusable`.
    pub fn open(path: &Path, cache: Option<Arc<BlockCache>>) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let unusable = |what: String| {
            QuillError::SSTableUnusable(format!("{}: {}", path.display(), what))
        };

        if file_size < TRAILER_SIZE {
            return Err(unusable(format!("file is only {} bytes", file_size)));
        }
        file.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;
        let mut trailer = [0u8; TRAILER_SIZE as usize];
        file.read_exact(&mut trailer)?;
        if &trailer[4..] != MAGIC {
            return Err(unusable(format!("bad magic {:?}", &trailer[4..])));
        }
        let metadata_len = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as u64;
        if metadata_len + TRAILER_SIZE > file_size {
            return Err(unusable(format!("metadata length {} exceeds file", metadata_len)));
        }

        let metadata_offset = file_size - TRAILER_SIZE - metadata_len;
        let metadata_bytes = read_at(&mut file, metadata_offset, metadata_len)?;
        let metadata = SSTableMetadata::decode(&metadata_bytes)?;
        // Sections must tile the file exactly up to the metadata, which also
        // bounds every section read below by the file size.
        let bloom_offset = match (metadata.bloom_offset(), metadata.metadata_offset()) {
            (Some(bloom_offset), Some(end)) if end == metadata_offset => bloom_offset,
            _ => return Err(unusable("section sizes do not add up".to_string())),
        };

        let index_bytes = read_at(&mut file, metadata.index_offset(), metadata.index_size)?;
        if crc32fast::hash(&index_bytes) != metadata.index_checksum {
            return Err(unusable("index checksum mismatch".to_string()));
        }
        let index: Vec<IndexEntry> =
            codec::decode(&index_bytes).map_err(|e| unusable(format!("index: {}", e)))?;
        if index.len() as u64 != metadata.block_count {
            return Err(unusable("index does not match block count".to_string()));
        }
        let block_in_bounds = |e: &IndexEntry| {
            e.offset
                .checked_add(e.size)
                .map_or(false, |end| end <= metadata.data_size)
        };
        if let Some(pos) = index.iter().position(|e| !block_in_bounds(e)) {
            return Err(unusable(format!("block {} lies outside the data section", pos)));
        }

        let bloom_bytes = read_at(&mut file, bloom_offset, metadata.bloom_size)?;
        let bloom: BloomFilter =
            codec::decode(&bloom_bytes).map_err(|e| unusable(format!("bloom: {}", e)))?;
        if !bloom.is_consistent() {
            return Err(unusable("bloom filter is inconsistent".to_string()));
        }

        let compressor = compressor_for(&metadata.compression)?;
        let block_ids = index
            .iter()
            .map(|e| block_id(metadata.table_id, &e.first_key, &e.last_key))
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            index,
            block_ids,
            bloom,
            compressor,
            file: Mutex::new(file),
            cache,
        })
    }

    /// Point lookup. `Ok(None)` when this table holds nothing for `key`;
    /// a found record may be a tombstone or expired.
    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        if !self.may_contain(key) {
            return Ok(None);
        }
        let Some(pos) = self.find_block(key) else {
            return Ok(None);
        };

        let id = self.block_ids[pos];
        if let Some(cache) = &self.cache {
            match cache.search_block(id, key) {
                Ok(record) => return Ok(Some(record)),
                Err(QuillError::KeyNotInBlock) => return Ok(None),
                Err(QuillError::CacheMiss) => {}
                Err(e) => return Err(e),
            }
        }

        let block = Arc::new(self.read_block(pos)?);
        let found = block.search(key).cloned();
        if let Some(cache) = &self.cache {
            cache.add(block);
        }
        Ok(found)
    }

    /// Range check followed by the bloom filter
    pub fn may_contain(&self, key: &str) -> bool {
        match (self.first_key(), self.last_key()) {
            (Some(first), Some(last)) if first <= key && key <= last => {
                self.bloom.may_contain(key.as_bytes())
            }
            _ => false,
        }
    }

    /// Index of the block whose key range holds `key`
    fn find_block(&self, key: &str) -> Option<usize> {
        let pos = self.index.partition_point(|e| e.last_key.as_str() < key);
        self.index.get(pos).filter(|e| e.contains(key)).map(|_| pos)
    }

    /// Read, verify and decode block `pos`, bypassing the cache
    pub fn read_block(&self, pos: usize) -> Result<Block> {
        let entry = self.index.get(pos).ok_or_else(|| {
            QuillError::SSTableUnusable(format!("block {} out of range", pos))
        })?;
        let stored = {
            let mut file = self.file.lock();
            read_at(&mut file, entry.offset, entry.size)?
        };
        Block::decode(self.block_ids[pos], &stored, entry.offset, self.compressor.as_ref())
    }

    /// Stream every record in key order (does not touch the cache)
    pub fn iter(&self) -> SSTableIterator<'_> {
        SSTableIterator::new(self)
    }

    /// Check every block checksum and the data section checksum
    pub fn verify(&self) -> Result<()> {
        let mut hasher = crc32fast::Hasher::new();
        for (pos, entry) in self.index.iter().enumerate() {
            let stored = {
                let mut file = self.file.lock();
                read_at(&mut file, entry.offset, entry.size)?
            };
            hasher.update(&stored);
            Block::decode(self.block_ids[pos], &stored, entry.offset, self.compressor.as_ref())?;
        }
        let actual = hasher.finalize();
        if actual != self.metadata.checksum {
            return Err(QuillError::BlockChecksumMismatch {
                offset: 0,
                expected: self.metadata.checksum,
                actual,
            });
        }
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.metadata.table_id
    }

    pub fn level(&self) -> usize {
        self.metadata.level as usize
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &SSTableMetadata {
        &self.metadata
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn block_ids(&self) -> &[u64] {
        &self.block_ids
    }

    pub fn record_count(&self) -> u64 {
        self.metadata.record_count
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Smallest key (for range filtering)
    pub fn first_key(&self) -> Option<&str> {
        self.index.first().map(|e| e.first_key.as_str())
    }

    /// Largest key (for range filtering)
    pub fn last_key(&self) -> Option<&str> {
        self.index.last().map(|e| e.last_key.as_str())
    }

    /// Evict this table's blocks from the shared cache
    pub fn evict_from_cache(&self) {
        if let Some(cache) = &self.cache {
            for id in &self.block_ids {
                cache.remove(*id);
            }
        }
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("path", &self.path)
            .field("id", &self.metadata.table_id)
            .field("level", &self.metadata.level)
            .field("records", &self.metadata.record_count)
            .field("blocks", &self.index.len())
            .finish()
    }
}

fn read_at(file: &mut File, offset: u64, len: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}
