//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append a frame for every mutation before it is applied
//! - Synchronous (inline) or asynchronous (buffered + flusher) writes
//! - Rotation (truncate to zero) once the memtable has been swapped out
//! - Sequential reading and replay into a fresh memtable
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Frame 1                                 │
//! │ ┌──────────────────┬──────────────────┐ │
//! │ │ Len (i64, BE)    │ Command (Len)    │ │
//! │ └──────────────────┴──────────────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Frame 2 ...                             │
//! └─────────────────────────────────────────┘
//! ```
//! There is no file header; a clean end of file terminates the log. The
//! command is a [`WalCommand`] encoded with the value codec.

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{WalCommand, WalOp, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use reader::WalReader;
pub use recovery::{replay, truncate_tail, verify, ReplayStats};
pub use writer::WalWriter;
