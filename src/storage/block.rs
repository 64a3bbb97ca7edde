//! Data blocks
//!
//! ## Layout
//! ```text
//! ┌───────────────────────────────────────────────┬──────────────┐
//! │ Stored payload (compressed)                   │ CRC32 (u32)  │
//! │ [KeyLen u32][Key][RecLen u32][Record] ...     │ BE, over the │
//! │                                               │ stored bytes │
//! └───────────────────────────────────────────────┴──────────────┘
//! ```
//! Records inside a block are sorted by key; the record bytes are the codec
//! encoding of [`Record`].

use bytes::{Buf, BufMut, BytesMut};

use crate::codec;
use crate::error::{QuillError, Result};
use crate::record::{Record, RecordKV};

use super::compression::Compressor;

/// Trailing checksum size
pub const BLOCK_CHECKSUM_SIZE: usize = 4;

/// Per-record framing overhead: key length + record length
const ENTRY_OVERHEAD: usize = 8;

/// A decoded block held in memory (and in the block cache)
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    id: u64,
    records: Vec<RecordKV>,
    /// Uncompressed payload size, used for cache accounting
    size: usize,
}

impl Block {
    /// Verify, decompress and decode a block as stored on disk.
    /// `offset` is only used for error reporting.
    pub fn decode(id: u64, stored: &[u8], offset: u64, compressor: &dyn Compressor) -> Result<Self> {
        if stored.len() < BLOCK_CHECKSUM_SIZE {
            return Err(QuillError::SSTableUnusable(format!(
                "block at offset {} is {} bytes",
                offset,
                stored.len()
            )));
        }
        let (body, mut trailer) = stored.split_at(stored.len() - BLOCK_CHECKSUM_SIZE);
        let expected = trailer.get_u32();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(QuillError::BlockChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        let payload = compressor.decompress(body)?;
        let size = payload.len();
        let records = decode_records(&payload, offset)?;
        Ok(Self { id, records, size })
    }

    /// Build a block directly from sorted records
    pub fn from_records(id: u64, records: Vec<RecordKV>) -> Result<Self> {
        let mut size = 0;
        for kv in &records {
            size += ENTRY_OVERHEAD + kv.key.len() + codec::encoded_size(&kv.record)?;
        }
        Ok(Self { id, records, size })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn records(&self) -> &[RecordKV] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RecordKV> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn first_key(&self) -> Option<&str> {
        self.records.first().map(|kv| kv.key.as_str())
    }

    pub fn last_key(&self) -> Option<&str> {
        self.records.last().map(|kv| kv.key.as_str())
    }

    /// Binary search for `key`
    pub fn search(&self, key: &str) -> Option<&Record> {
        self.records
            .binary_search_by(|kv| kv.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.records[i].record)
    }
}

fn decode_records(mut payload: &[u8], offset: u64) -> Result<Vec<RecordKV>> {
    let malformed = |what: &str| {
        QuillError::SSTableUnusable(format!("malformed block at offset {}: {}", offset, what))
    };

    let mut records = Vec::new();
    while payload.has_remaining() {
        if payload.remaining() < 4 {
            return Err(malformed("truncated key length"));
        }
        let key_len = payload.get_u32() as usize;
        if payload.remaining() < key_len {
            return Err(malformed("truncated key"));
        }
        let key = String::from_utf8(payload[..key_len].to_vec())
            .map_err(|_| malformed("key is not UTF-8"))?;
        payload.advance(key_len);

        if payload.remaining() < 4 {
            return Err(malformed("truncated record length"));
        }
        let rec_len = payload.get_u32() as usize;
        if payload.remaining() < rec_len {
            return Err(malformed("truncated record"));
        }
        let record: Record = codec::decode(&payload[..rec_len])?;
        payload.advance(rec_len);

        records.push(RecordKV { key, record });
    }
    Ok(records)
}

/// A sealed block ready to be appended to a file
#[derive(Debug)]
pub struct SealedBlock {
    /// `[stored payload][crc32]`
    pub bytes: Vec<u8>,
    pub first_key: String,
    pub last_key: String,
    pub count: usize,
}

/// Accumulates sorted records into one block
pub struct BlockBuilder {
    buf: BytesMut,
    max_size: usize,
    first_key: Option<String>,
    last_key: Option<String>,
    count: usize,
}

impl BlockBuilder {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_size),
            max_size,
            first_key: None,
            last_key: None,
            count: 0,
        }
    }

    /// Encoded size of `key` + `record_bytes` inside a block
    pub fn entry_size(key: &str, record_bytes: &[u8]) -> usize {
        ENTRY_OVERHEAD + key.len() + record_bytes.len()
    }

    /// Whether the entry fits. An empty builder accepts anything so an
    /// oversized record ends up alone in its own block.
    pub fn fits(&self, key: &str, record_bytes: &[u8]) -> bool {
        self.is_empty() || self.buf.len() + Self::entry_size(key, record_bytes) <= self.max_size
    }

    /// Append an entry; keys must arrive in ascending order
    pub fn add(&mut self, key: &str, record_bytes: &[u8]) {
        self.buf.put_u32(key.len() as u32);
        self.buf.put_slice(key.as_bytes());
        self.buf.put_u32(record_bytes.len() as u32);
        self.buf.put_slice(record_bytes);

        if self.first_key.is_none() {
            self.first_key = Some(key.to_string());
        }
        self.last_key = Some(key.to_string());
        self.count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn payload_len(&self) -> usize {
        self.buf.len()
    }

    /// Compress, checksum and reset; `None` when nothing was added
    pub fn seal(&mut self, compressor: &dyn Compressor) -> Result<Option<SealedBlock>> {
        if self.is_empty() {
            return Ok(None);
        }
        let payload = self.buf.split();
        let mut bytes = compressor.compress(&payload)?;
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());

        let sealed = SealedBlock {
            bytes,
            first_key: self.first_key.take().unwrap_or_default(),
            last_key: self.last_key.take().unwrap_or_default(),
            count: self.count,
        };
        self.count = 0;
        Ok(Some(sealed))
    }
}
