//! SSTable Builder
//!
//! Streams sorted records into blocks and writes a new SSTable file.
//!
//! The file is written under a temporary name and renamed into place after
//! fsync, so a reader never observes a half-written table.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::bloom::BloomFilter;
use crate::codec;
use crate::config::{CompressionKind, Config};
use crate::error::{QuillError, Result};
use crate::record::{now_secs, RecordKV};
use crate::storage::block::BlockBuilder;
use crate::storage::compression::{self, Compressor};

use super::{IndexEntry, SSTableMetadata, MAGIC, VERSION};

/// Knobs for writing a table
#[derive(Debug, Clone, Copy)]
pub struct SSTableOptions {
    pub block_max_size: usize,
    pub compression: CompressionKind,
    pub bloom_false_positive_rate: f64,
}

impl Default for SSTableOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SSTableOptions {
    fn from(config: &Config) -> Self {
        Self {
            block_max_size: config.block_max_size,
            compression: config.compression,
            bloom_false_positive_rate: config.bloom_false_positive_rate,
        }
    }
}

/// Writer for a new SSTable; records must be added in ascending key order
pub struct SSTableWriter {
    /// Final path; the file lives at `tmp_path` until `finish`
    path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    table_id: u64,
    level: usize,
    block: BlockBuilder,
    compressor: Box<dyn Compressor>,
    index: Vec<IndexEntry>,
    bloom: BloomFilter,
    /// Current write position
    offset: u64,
    /// Running CRC over the data section
    data_hasher: crc32fast::Hasher,
    record_count: u64,
    last_key: Option<String>,
}

impl SSTableWriter {
    /// Create a writer for `path`. `expected_records` sizes the bloom filter.
    pub fn create(
        path: &Path,
        table_id: u64,
        level: usize,
        expected_records: usize,
        options: SSTableOptions,
    ) -> Result<Self> {
        let tmp_path = path.with_extension("sst.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer: BufWriter::new(file),
            table_id,
            level,
            block: BlockBuilder::new(options.block_max_size),
            compressor: compression::compressor(options.compression),
            index: Vec::new(),
            bloom: BloomFilter::new(expected_records.max(1), options.bloom_false_positive_rate),
            offset: 0,
            data_hasher: crc32fast::Hasher::new(),
            record_count: 0,
            last_key: None,
        })
    }

    /// Add a record (must be called in strictly ascending key order)
    pub fn add(&mut self, kv: &RecordKV) -> Result<()> {
        if let Some(last) = &self.last_key {
            if kv.key.as_str() <= last.as_str() {
                return Err(QuillError::SSTableUnusable(format!(
                    "key {:?} added after {:?}",
                    kv.key, last
                )));
            }
        }

        let record_bytes = codec::encode(&kv.record)?;
        if !self.block.fits(&kv.key, &record_bytes) {
            self.seal_block()?;
        }
        self.block.add(&kv.key, &record_bytes);
        self.bloom.insert(kv.key.as_bytes());
        self.record_count += 1;
        self.last_key = Some(kv.key.clone());
        Ok(())
    }

    fn seal_block(&mut self) -> Result<()> {
        let Some(sealed) = self.block.seal(self.compressor.as_ref())? else {
            return Ok(());
        };
        self.writer.write_all(&sealed.bytes)?;
        self.data_hasher.update(&sealed.bytes);
        self.index.push(IndexEntry {
            first_key: sealed.first_key,
            last_key: sealed.last_key,
            offset: self.offset,
            size: sealed.bytes.len() as u64,
            count: sealed.count as u32,
        });
        self.offset += sealed.bytes.len() as u64;
        Ok(())
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write index, bloom, metadata and trailer; fsync and move the file
    /// into place. Returns the final path.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.seal_block()?;
        let data_size = self.offset;

        let index_bytes = codec::encode(&self.index)?;
        self.writer.write_all(&index_bytes)?;

        let bloom_bytes = codec::encode(&self.bloom)?;
        self.writer.write_all(&bloom_bytes)?;

        let metadata = SSTableMetadata {
            version: VERSION,
            table_id: self.table_id,
            level: self.level as u32,
            record_count: self.record_count,
            block_count: self.index.len() as u64,
            data_size,
            index_size: index_bytes.len() as u64,
            bloom_size: bloom_bytes.len() as u64,
            created_at: now_secs(),
            compression: self.compressor.tag().to_string(),
            checksum: self.data_hasher.clone().finalize(),
            index_checksum: crc32fast::hash(&index_bytes),
        };
        let metadata_bytes = metadata.encode();
        self.writer.write_all(&metadata_bytes)?;
        self.writer.write_all(&(metadata_bytes.len() as u32).to_be_bytes())?;
        self.writer.write_all(MAGIC)?;
        self.writer.flush()?;

        let file = self.writer.into_inner().map_err(|e| {
            QuillError::SSTableUnusable(format!("failed to flush SSTable: {}", e))
        })?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            // Persist the rename itself
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }

        tracing::debug!(
            path = %self.path.display(),
            records = metadata.record_count,
            blocks = metadata.block_count,
            "SSTable written"
        );
        Ok(self.path)
    }

    /// Drop the partially written file
    pub fn abandon(self) {
        let tmp_path = self.tmp_path.clone();
        drop(self.writer);
        let _ = fs::remove_file(tmp_path);
    }
}
