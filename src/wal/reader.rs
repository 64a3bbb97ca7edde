//! WAL Reader
//!
//! Sequentially parses frames from the WAL file. Any malformed frame is a
//! hard `WalCorrupted` error carrying the offset of the frame it started at.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::codec;
use crate::error::{QuillError, Result};

use super::{WalCommand, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};

/// Reads commands from a WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last frame successfully read
    offset: u64,
    done: bool,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            done: false,
        })
    }

    /// Read the next command; `Ok(None)` at a clean end of file
    pub fn next_command(&mut self) -> Result<Option<WalCommand>> {
        if self.done {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        let read = read_full(&mut self.reader, &mut header)?;
        if read == 0 {
            self.done = true;
            return Ok(None);
        }
        if read < FRAME_HEADER_SIZE {
            return Err(self.corrupted(format!("partial length prefix ({} bytes)", read)));
        }

        let len = i64::from_be_bytes(header);
        if !(0..=MAX_FRAME_SIZE).contains(&len) {
            return Err(self.corrupted(format!("invalid frame length {}", len)));
        }

        let mut payload = vec![0u8; len as usize];
        let read = read_full(&mut self.reader, &mut payload)?;
        if read < payload.len() {
            return Err(self.corrupted(format!(
                "short frame body: expected {} bytes, got {}",
                len, read
            )));
        }

        let command: WalCommand = codec::decode(&payload)
            .map_err(|e| self.corrupted(format!("undecodable command: {}", e)))?;
        self.offset += (FRAME_HEADER_SIZE + payload.len()) as u64;
        Ok(Some(command))
    }

    /// Bytes of well-formed frames read so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn corrupted(&mut self, reason: String) -> QuillError {
        self.done = true;
        QuillError::WalCorrupted {
            offset: self.offset,
            reason,
        }
    }
}

impl Iterator for WalReader {
    type Item = Result<WalCommand>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_command().transpose()
    }
}

/// Like `read_exact`, but reports how many bytes were available at EOF
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
