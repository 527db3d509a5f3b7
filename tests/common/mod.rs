// tests/common/mod.rs

//! Shared test utilities for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use updtrack::{IdentityMode, InventoryStore, PackageEntry, SqliteStore};

/// Create an on-disk store in a fresh temp directory.
///
/// Returns (TempDir, db_path, store) - keep the TempDir alive to prevent
/// cleanup. The path allows tests to open additional connections to the
/// same database.
pub fn setup_store(identity: IdentityMode) -> (TempDir, String, SqliteStore) {
    init_tracing();

    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir
        .path()
        .join("updtrack.db")
        .to_str()
        .unwrap()
        .to_string();

    let mut store = SqliteStore::open(&db_path, identity).unwrap();
    store.ensure_schema().unwrap();
    (temp_dir, db_path, store)
}

/// A fixed timestamp within May 2024, keyed by day
pub fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
}

/// Build package entries from (name, version) pairs
pub fn packages(pairs: &[(&str, &str)]) -> Vec<PackageEntry> {
    pairs
        .iter()
        .map(|(name, version)| PackageEntry::new(*name, *version))
        .collect()
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
