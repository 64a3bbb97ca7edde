//! KvStore test suite
//!
//! The same behavioural checks run against every backend.

mod conformance_tests;
mod memory_tests;

use quillkv::{Config, Engine, KvStore, MemoryStore};
use tempfile::TempDir;

/// A backend under test, plus whatever it needs to stay alive
pub struct Backend {
    pub name: &'static str,
    pub store: Box<dyn KvStore>,
    _dir: Option<TempDir>,
}

pub fn backends() -> Vec<Backend> {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(
        Config::builder()
            .data_dir(dir.path())
            .max_value_bytes(1024)
            .build(),
    )
    .unwrap();
    vec![
        Backend {
            name: "memory",
            store: Box::new(MemoryStore::new(8, 1024)),
            _dir: None,
        },
        Backend {
            name: "engine",
            store: Box::new(engine),
            _dir: Some(dir),
        },
    ]
}
