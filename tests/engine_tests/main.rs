//! Engine test suite


use quillkv::config::{Config, ConfigBuilder, WalMode};
use quillkv::Engine;
use tempfile::TempDir;

pub fn test_config(dir: &TempDir) -> ConfigBuilder {
    Config::builder()
        .data_dir(dir.path())
        .wal_mode(WalMode::Sync { fsync: true })
        .compaction_pacing(std::time::Duration::from_millis(20))
}

pub fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir).build()).unwrap();
    (temp_dir, engine)
}
