//! Test fixtures and store helpers.
//!
//! A [`TestEnv`] owns a temporary data directory and a manager rooted in it.
//! Everything is removed when the environment is dropped.

use distdb_core::{
    CipherPassword, Delegate, Entry, Manager, ManagerConfig, Partition, StoreConfig,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// App id used by every fixture manager.
pub const TEST_APP: &str = "testkit_app";
/// User id used by every fixture manager.
pub const TEST_USER: &str = "testkit_user";

/// A temporary data directory with a manager over it.
pub struct TestEnv {
    /// Manager rooted in the temporary directory.
    pub manager: Manager,
    temp_dir: TempDir,
}

impl TestEnv {
    /// Creates a fresh environment.
    pub fn new() -> Self {
        crate::init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let manager = Manager::new(ManagerConfig::new(temp_dir.path(), TEST_APP, TEST_USER))
            .expect("Failed to create manager");
        Self { manager, temp_dir }
    }

    /// The data directory.
    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A path inside the data directory that does not exist yet.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Opens a persistent native store.
    pub fn open_native(&self, store_id: &str) -> Delegate {
        self.open(store_id, StoreConfig::new())
    }

    /// Opens a persistent local-only store.
    pub fn open_local(&self, store_id: &str) -> Delegate {
        self.open(store_id, StoreConfig::new().local_only(true))
    }

    /// Opens a memory-only native store.
    pub fn open_memory(&self, store_id: &str) -> Delegate {
        self.open(store_id, StoreConfig::new().memory(true))
    }

    /// Opens a persistent native store encrypted with `password`.
    pub fn open_encrypted(&self, store_id: &str, password: &str) -> Delegate {
        self.open(store_id, StoreConfig::new().encrypted(password_of(password)))
    }

    /// Opens a store with an explicit configuration.
    pub fn open(&self, store_id: &str, config: StoreConfig) -> Delegate {
        self.manager
            .open(store_id, config)
            .unwrap_or_else(|e| panic!("Failed to open store {store_id}: {e}"))
    }

    /// Directory of a persistent store.
    pub fn store_path(&self, store_id: &str, local_only: bool) -> PathBuf {
        self.manager
            .store_path(store_id, local_only)
            .expect("Failed to resolve store path")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a password, panicking on an invalid one.
pub fn password_of(text: &str) -> CipherPassword {
    CipherPassword::new(text).expect("Invalid test password")
}

/// Builds entries from string pairs.
pub fn entries_of(pairs: &[(&str, &str)]) -> Vec<Entry> {
    pairs
        .iter()
        .map(|(k, v)| Entry::new(k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

/// Everything in `partition`, as string pairs. An empty partition is empty.
pub fn contents(delegate: &Delegate, partition: Partition) -> Vec<(String, String)> {
    match delegate.get_entries(partition, b"") {
        Ok(entries) => entries
            .into_iter()
            .map(|e| {
                (
                    String::from_utf8_lossy(&e.key).into_owned(),
                    String::from_utf8_lossy(&e.value).into_owned(),
                )
            })
            .collect(),
        Err(distdb_core::CoreError::NotFound { .. }) => Vec::new(),
        Err(e) => panic!("Failed to list {partition:?}: {e}"),
    }
}
