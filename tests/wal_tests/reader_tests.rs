//! Tests for WalReader
//!
//! These tests verify:
//! - Reading a well-formed log in order
//! - An empty log yields nothing
//! - Truncated frames, bad lengths and undecodable payloads are reported
//!   with the offset of the frame that failed

use std::fs::{self, OpenOptions};
use std::io::Write;

use quillkv::wal::{WalOp, WalReader, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use quillkv::QuillError;

use super::{set_command, setup_temp_wal, write_commands};

fn corruption_offset(err: QuillError) -> u64 {
    match err {
        QuillError::WalCorrupted { offset, .. } => offset,
        other => panic!("expected WalCorrupted, got {:?}", other),
    }
}

#[test]
fn test_read_commands_in_order() {
    let (_temp, path) = setup_temp_wal();
    write_commands(&path, 4);

    let mut reader = WalReader::open(&path).unwrap();
    for i in 0..4 {
        let command = reader.next_command().unwrap().unwrap();
        assert_eq!(command.key, format!("key{}", i));
        assert_eq!(command.op(), WalOp::Set);
    }
    assert!(reader.next_command().unwrap().is_none());
    assert_eq!(reader.offset(), fs::metadata(&path).unwrap().len());
}

#[test]
fn test_empty_log() {
    let (_temp, path) = setup_temp_wal();
    fs::File::create(&path).unwrap();
    assert_eq!(WalReader::open(&path).unwrap().count(), 0);
}

#[test]
fn test_partial_length_prefix() {
    let (_temp, path) = setup_temp_wal();
    write_commands(&path, 2);
    let valid = fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .append(true)
        .open(&path)
        .unwrap()
        .write_all(&[0, 0, 0])
        .unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    reader.next_command().unwrap().unwrap();
    reader.next_command().unwrap().unwrap();
    assert_eq!(corruption_offset(reader.next_command().unwrap_err()), valid);
}

#[test]
fn test_truncated_body() {
    let (_temp, path) = setup_temp_wal();
    write_commands(&path, 1);
    let first = fs::metadata(&path).unwrap().len();

    let frame = set_command("cut", 9).encode_frame().unwrap();
    OpenOptions::new()
        .append(true)
        .open(&path)
        .unwrap()
        .write_all(&frame[..frame.len() - 2])
        .unwrap();

    let results: Vec<_> = WalReader::open(&path).unwrap().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    let err = results.into_iter().nth(1).unwrap().unwrap_err();
    assert_eq!(corruption_offset(err), first);
}

#[test]
fn test_negative_and_oversized_lengths() {
    for len in [-1i64, MAX_FRAME_SIZE + 1] {
        let (_temp, path) = setup_temp_wal();
        let mut bytes = len.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        fs::write(&path, &bytes).unwrap();

        let err = WalReader::open(&path).unwrap().next_command().unwrap_err();
        assert_eq!(corruption_offset(err), 0);
    }
}

#[test]
fn test_undecodable_payload() {
    let (_temp, path) = setup_temp_wal();
    let mut bytes = 4i64.to_be_bytes().to_vec();
    bytes.extend_from_slice(&[0xff; 4]);
    assert_eq!(bytes.len(), FRAME_HEADER_SIZE + 4);
    fs::write(&path, &bytes).unwrap();

    let err = WalReader::open(&path).unwrap().next_command().unwrap_err();
    assert_eq!(corruption_offset(err), 0);
}

#[test]
fn test_iterator_stops_after_error() {
    let (_temp, path) = setup_temp_wal();
    fs::write(&path, [0u8; 3]).unwrap();
    let mut reader = WalReader::open(&path).unwrap();
    assert!(reader.next().unwrap().is_err());
    assert!(reader.next().is_none());
}
