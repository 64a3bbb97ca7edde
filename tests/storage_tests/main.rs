//! Storage test suite: SSTables and the storage manager

mod manager_tests;

use quillkv::record::{Record, RecordKV, NO_EXPIRY};
use quillkv::Value;

/// `count` sorted records `key00000 ..` with string values
pub fn sorted_records(count: usize) -> Vec<RecordKV> {
    (0..count)
        .map(|i| {
            RecordKV::new(
                format!("key{:05}", i),
                Record::scalar(Value::from(format!("value-{}", i)), NO_EXPIRY),
            )
        })
        .collect()
}
