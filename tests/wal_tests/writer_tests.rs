//! Tests for WalWriter
//!
//! These tests verify:
//! - Sync mode writes frames inline
//! - Async mode buffers and the flusher drains the buffer
//! - Rotation truncates the file, also when requested through the channel
//! - Close flushes whatever is still buffered

use std::thread;
use std::time::Duration;

use crossbeam::channel;
use quillkv::config::WalMode;
use quillkv::wal::{WalReader, WalWriter, FRAME_HEADER_SIZE};

use super::{set_command, setup_temp_wal, write_commands};

fn read_all(path: &std::path::Path) -> Vec<quillkv::wal::WalCommand> {
    WalReader::open(path)
        .unwrap()
        .collect::<quillkv::Result<Vec<_>>>()
        .unwrap()
}

// =============================================================================
// Sync Mode Tests
// =============================================================================

#[test]
fn test_open_creates_file() {
    let (_temp, path) = setup_temp_wal();
    let writer = WalWriter::open(&path, WalMode::Sync { fsync: false }, None).unwrap();
    assert!(path.exists());
    assert_eq!(writer.file_len().unwrap(), 0);
}

#[test]
fn test_sync_append_is_visible_immediately() {
    let (_temp, path) = setup_temp_wal();
    let writer = WalWriter::open(&path, WalMode::Sync { fsync: false }, None).unwrap();

    let command = set_command("a", 1);
    writer.append(&command).unwrap();

    let frame = command.encode_frame().unwrap();
    assert!(frame.len() > FRAME_HEADER_SIZE);
    assert_eq!(writer.file_len().unwrap(), frame.len() as u64);
    assert_eq!(read_all(&path), vec![command]);
    assert_eq!(writer.frames_appended(), 1);
}

#[test]
fn test_reopen_appends_to_existing_log() {
    let (_temp, path) = setup_temp_wal();
    write_commands(&path, 3);
    write_commands(&path, 2);
    assert_eq!(read_all(&path).len(), 5);
}

// =============================================================================
// Async Mode Tests
// =============================================================================

#[test]
fn test_async_flusher_drains_buffer() {
    let (_temp, path) = setup_temp_wal();
    let mode = WalMode::Async {
        buffer_size: 1024 * 1024,
        flush_interval: Duration::from_millis(10),
        sync_every_n_flushes: 1,
        max_flush_retries: 3,
    };
    let writer = WalWriter::open(&path, mode, None).unwrap();
    for i in 0..10 {
        writer.append(&set_command(&format!("k{}", i), i)).unwrap();
    }

    let mut flushed = 0;
    for _ in 0..100 {
        flushed = read_all(&path).len();
        if flushed == 10 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(flushed, 10);
}

#[test]
fn test_async_close_flushes_remaining_frames() {
    let (_temp, path) = setup_temp_wal();
    let mode = WalMode::Async {
        buffer_size: 1024 * 1024,
        flush_interval: Duration::from_secs(60),
        sync_every_n_flushes: 100,
        max_flush_retries: 3,
    };
    let writer = WalWriter::open(&path, mode, None).unwrap();
    for i in 0..5 {
        writer.append(&set_command(&format!("k{}", i), i)).unwrap();
    }
    writer.close().unwrap();

    assert_eq!(read_all(&path).len(), 5);
    // Idempotent
    writer.close().unwrap();
}

#[test]
fn test_async_full_buffer_triggers_flush() {
    let (_temp, path) = setup_temp_wal();
    let mode = WalMode::Async {
        buffer_size: 64,
        flush_interval: Duration::from_secs(60),
        sync_every_n_flushes: 1,
        max_flush_retries: 3,
    };
    let writer = WalWriter::open(&path, mode, None).unwrap();
    for i in 0..20 {
        writer.append(&set_command(&format!("key-{:04}", i), i)).unwrap();
    }

    let mut on_disk = 0;
    for _ in 0..100 {
        on_disk = writer.file_len().unwrap();
        if on_disk > 0 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(on_disk > 0);
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_rotate_truncates_to_zero() {
    let (_temp, path) = setup_temp_wal();
    let writer = WalWriter::open(&path, WalMode::Sync { fsync: false }, None).unwrap();
    writer.append(&set_command("old", 1)).unwrap();
    writer.rotate().unwrap();
    assert_eq!(writer.file_len().unwrap(), 0);

    writer.append(&set_command("new", 2)).unwrap();
    let commands = read_all(&path);
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].key, "new");
}

#[test]
fn test_rotation_request_applies_before_next_append() {
    let (_temp, path) = setup_temp_wal();
    let (rotate_tx, rotate_rx) = channel::bounded(1);
    let writer = WalWriter::open(&path, WalMode::Sync { fsync: false }, Some(rotate_rx)).unwrap();

    writer.append(&set_command("before", 1)).unwrap();
    rotate_tx.send(()).unwrap();
    writer.append(&set_command("after", 2)).unwrap();

    let commands = read_all(&path);
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].key, "after");
}

#[test]
fn test_rotate_discards_async_buffer() {
    let (_temp, path) = setup_temp_wal();
    let mode = WalMode::Async {
        buffer_size: 1024 * 1024,
        flush_interval: Duration::from_secs(60),
        sync_every_n_flushes: 1,
        max_flush_retries: 3,
    };
    let writer = WalWriter::open(&path, mode, None).unwrap();
    writer.append(&set_command("buffered", 1)).unwrap();
    writer.rotate().unwrap();
    writer.close().unwrap();

    assert!(read_all(&path).is_empty());
}
