//! WAL test suite

mod reader_tests;
mod writer_tests;

use std::path::PathBuf;

use quillkv::config::WalMode;
use quillkv::record::{Record, NO_EXPIRY};
use quillkv::wal::{WalCommand, WalWriter};
use quillkv::Value;
use tempfile::TempDir;

pub fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("wal.log");
    (temp_dir, wal_path)
}

pub fn set_command(key: &str, value: i64) -> WalCommand {
    WalCommand::from_record(key, &Record::scalar(Value::Int(value), NO_EXPIRY))
}

/// Write `count` SETs through a synchronous writer
pub fn write_commands(path: &PathBuf, count: usize) {
    let writer = WalWriter::open(path, WalMode::Sync { fsync: true }, None).unwrap();
    for i in 0..count {
        writer.append(&set_command(&format!("key{}", i), i as i64)).unwrap();
    }
}
