//! MemTable test suite
