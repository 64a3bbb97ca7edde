//! Block compression
//!
//! Blocks are compressed as a whole before their checksum is computed. The
//! algorithm's tag is written into the SSTable metadata and resolved again
//! when the table is opened.

use crate::config::CompressionKind;
use crate::error::{QuillError, Result};

/// A reversible block transform
pub trait Compressor: Send + Sync {
    /// Tag stored in SSTable metadata
    fn tag(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Identity transform
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn tag(&self) -> &'static str {
        "none"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Snappy raw format
#[derive(Debug, Default, Clone, Copy)]
pub struct SnappyCompression;

impl Compressor for SnappyCompression {
    fn tag(&self) -> &'static str {
        "snappy"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| QuillError::Codec(format!("snappy compress: {}", e)))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| QuillError::Codec(format!("snappy decompress: {}", e)))
    }
}

/// Compressor for a configured kind
pub fn compressor(kind: CompressionKind) -> Box<dyn Compressor> {
    match kind {
        CompressionKind::None => Box::new(NoCompression),
        CompressionKind::Snappy => Box::new(SnappyCompression),
    }
}

/// Resolve a metadata tag; unknown tags make the table unusable
pub fn compressor_for(tag: &str) -> Result<Box<dyn Compressor>> {
    match tag {
        "none" => Ok(Box::new(NoCompression)),
        "snappy" => Ok(Box::new(SnappyCompression)),
        other => Err(QuillError::SSTableUnusable(format!(
            "unknown compression tag {:?}",
            other
        ))),
    }
}
