//! WAL command definitions
//!
//! Defines the structure of individual WAL frames.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::Result;
use crate::record::{Record, RecordState, Value};

/// Length prefix size: i64 big-endian
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest command a reader accepts (64 MB)
pub const MAX_FRAME_SIZE: i64 = 64 * 1024 * 1024;

/// A logged mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalCommand {
    pub key: String,
    pub value: Value,
    /// Absolute expiry (epoch seconds) or `NO_EXPIRY`
    pub expiry: i64,
    pub state: RecordState,
}

/// Replay action of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalOp {
    Set,
    Delete,
}

impl WalCommand {
    pub fn from_record(key: &str, record: &Record) -> Self {
        match record {
            Record::Scalar(r) => Self {
                key: key.to_string(),
                value: r.value.clone(),
                expiry: r.expiry,
                state: r.state,
            },
        }
    }

    pub fn op(&self) -> WalOp {
        match self.state {
            RecordState::Active => WalOp::Set,
            RecordState::Tombstoned => WalOp::Delete,
        }
    }

    /// `[len: i64 BE][encoded command]`
    pub fn encode_frame(&self) -> Result<Vec<u8>> {
        let payload = codec::encode(self)?;
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.put_i64(payload.len() as i64);
        frame.put_slice(&payload);
        Ok(frame.to_vec())
    }
}
