//! SSTable Iterator
//!
//! Sequential iteration over all records of a table, block by block.

use crate::error::Result;
use crate::record::RecordKV;

use super::SSTable;

/// Iterator over the records of one SSTable, in key order.
///
/// Blocks are read straight from disk (and checksum-verified); the block
/// cache is left alone so a full scan does not flush it.
pub struct SSTableIterator<'a> {
    table: &'a SSTable,
    next_block: usize,
    current: std::vec::IntoIter<RecordKV>,
    failed: bool,
}

impl<'a> SSTableIterator<'a> {
    pub(super) fn new(table: &'a SSTable) -> Self {
        Self {
            table,
            next_block: 0,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }
}

impl Iterator for SSTableIterator<'_> {
    type Item = Result<RecordKV>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(kv) = self.current.next() {
                return Some(Ok(kv));
            }
            if self.next_block >= self.table.block_count() {
                return None;
            }
            match self.table.read_block(self.next_block) {
                Ok(block) => {
                    self.next_block += 1;
                    self.current = block.into_records().into_iter();
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
