//! # QuillKV
//!
//! An embeddable key-value storage engine with:
//! - Write-Ahead Logging (WAL), synchronous or buffered
//! - A bloom-filtered memtable backed by a skip list or a B-tree
//! - Block-based SSTables with checksums and optional Snappy compression
//! - A sharded LRU block cache
//! - Leveled compaction with tombstone and TTL reclamation
//! - A sharded in-memory backend behind the same [`KvStore`] trait
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────┐
//!                  │     KvStore (trait)      │
//!                  └────────────┬─────────────┘
//!                               │
//!          ┌────────────────────┴───────────────────┐
//!          ▼                                        ▼
//!   ┌─────────────┐                          ┌─────────────┐
//!   │   Engine    │                          │ MemoryStore │
//!   └──────┬──────┘                          └─────────────┘
//!          │
//!   ┌──────▼──────┐  frames   ┌─────────────┐
//!   │  MemTable   │──────────►│     WAL     │
//!   │  (RwLock)   │           └─────────────┘
//!   └──────┬──────┘
//!          │ retired tables (flush queue)
//!   ┌──────▼──────┐           ┌─────────────┐
//!   │  SSTables   │◄──────────│ Block Cache │
//!   │  L0 … Ln    │           └─────────────┘
//!   └──────┬──────┘
//!          │
//!   ┌──────▼──────┐
//!   │  Compactor  │
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod bloom;
pub mod codec;
pub mod record;
pub mod supervisor;

pub mod engine;
pub mod memtable;
pub mod storage;
pub mod store;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{CompressionKind, Config, MemTableKind, WalMode};
pub use engine::{Engine, EngineStats};
pub use error::{QuillError, Result, StatusCode};
pub use record::{Record, RecordKV, Value};
pub use store::{BatchOutcome, KvStore, Lookup, MemoryStore, Ttl};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of QuillKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
