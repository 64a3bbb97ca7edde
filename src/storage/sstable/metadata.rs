//! SSTable metadata footer

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{QuillError, Result};

use super::VERSION;

/// Self-describing footer written last into every table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableMetadata {
    pub version: u16,
    pub table_id: u64,
    pub level: u32,
    pub record_count: u64,
    pub block_count: u64,
    /// Bytes of the data section; the index starts here
    pub data_size: u64,
    pub index_size: u64,
    pub bloom_size: u64,
    /// Epoch seconds at which the table was written
    pub created_at: i64,
    pub compression: String,
    /// CRC32 over the data section
    pub checksum: u32,
    /// CRC32 over the index block
    pub index_checksum: u32,
}

impl SSTableMetadata {
    pub fn index_offset(&self) -> u64 {
        self.data_size
    }

    /// `None` when the section sizes overflow
    pub fn bloom_offset(&self) -> Option<u64> {
        self.data_size.checked_add(self.index_size)
    }

    /// Offset of the metadata itself; `None` when the section sizes overflow
    pub fn metadata_offset(&self) -> Option<u64> {
        self.bloom_offset()?.checked_add(self.bloom_size)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(80 + self.compression.len());
        buf.put_u16(self.version);
        buf.put_u64(self.table_id);
        buf.put_u32(self.level);
        buf.put_u64(self.record_count);
        buf.put_u64(self.block_count);
        buf.put_u64(self.data_size);
        buf.put_u64(self.index_size);
        buf.put_u64(self.bloom_size);
        buf.put_i64(self.created_at);
        buf.put_u16(self.compression.len() as u16);
        buf.put_slice(self.compression.as_bytes());
        buf.put_u32(self.checksum);
        buf.put_u32(self.index_checksum);
        buf.to_vec()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        const FIXED: usize = 2 + 8 + 4 + 8 * 6 + 2;
        let unusable = |what: &str| QuillError::SSTableUnusable(format!("metadata: {}", what));

        if buf.remaining() < FIXED {
            return Err(unusable("truncated"));
        }
        let version = buf.get_u16();
        if version != VERSION {
            return Err(unusable(&format!("unsupported version {}", version)));
        }
        let table_id = buf.get_u64();
        let level = buf.get_u32();
        let record_count = buf.get_u64();
        let block_count = buf.get_u64();
        let data_size = buf.get_u64();
        let index_size = buf.get_u64();
        let bloom_size = buf.get_u64();
        let created_at = buf.get_i64();

        let tag_len = buf.get_u16() as usize;
        if buf.remaining() != tag_len + 8 {
            return Err(unusable("bad compression tag length"));
        }
        let compression = String::from_utf8(buf[..tag_len].to_vec())
            .map_err(|_| unusable("compression tag is not UTF-8"))?;
        buf.advance(tag_len);
        let checksum = buf.get_u32();
        let index_checksum = buf.get_u32();

        Ok(Self {
            version,
            table_id,
            level,
            record_count,
            block_count,
            data_size,
            index_size,
            bloom_size,
            created_at,
            compression,
            checksum,
            index_checksum,
        })
    }
}
