//! Store manager: opening, closing and deleting stores.

use crate::communicator::ProcessCommunicator;
use crate::config::{ManagerConfig, StoreConfig};
use crate::corruption::{CorruptionHandler, CorruptionInfo, CorruptionSlot};
use crate::delegate::Delegate;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::store::{Store, StoreIdentity};
use crate::types::{validate_identifier, HandleId, StoreKind};
use distdb_storage::atomic;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StoreKey {
    store_id: String,
    kind: StoreKind,
}

/// Stores with at least one open handle.
#[derive(Default)]
pub(crate) struct Registry {
    stores: Mutex<HashMap<StoreKey, Arc<Store>>>,
}

impl Registry {
    /// Forgets `store` once its last handle is gone and checkpoints it.
    pub(crate) fn release(&self, store: &Arc<Store>) {
        let released = {
            let mut stores = self.stores.lock();
            if store.handle_count() > 0 {
                false
            } else {
                let before = stores.len();
                stores.retain(|_, s| !Arc::ptr_eq(s, store));
                stores.len() < before
            }
        };
        if released {
            store.shutdown();
        }
    }
}

struct ManagerInner {
    config: ManagerConfig,
    registry: Arc<Registry>,
    corruption: CorruptionSlot,
    communicator: RwLock<Option<Arc<dyn ProcessCommunicator>>>,
}

/// Entry point for one application and user.
///
/// A `Manager` opens stores by identifier and hands out [`Delegate`] handles.
/// Opening an identifier that is already open returns another handle on the
/// same store. Cloning a manager is cheap and every clone shares the same
/// open stores and corruption handler.
///
/// # Layout
///
/// Persistent stores live below `data_dir` in a directory named after the
/// SHA-256 of `user_id-app_id-store_id`, with one subdirectory per store
/// kind (`multi_ver` for native stores, `single_ver` for local-only ones).
///
/// # Example
///
/// ```rust,ignore
/// use distdb_core::{Manager, ManagerConfig, Partition, StoreConfig};
///
/// let manager = Manager::new(ManagerConfig::new("/var/lib/app", "app", "user"))?;
/// let delegate = manager.open("settings", StoreConfig::new())?;
/// delegate.put(Partition::Native, b"theme", b"dark")?;
/// manager.close(&delegate)?;
/// ```
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    /// Creates a manager. App and user ids must be 1..=128 ASCII
    /// alphanumerics or underscores.
    pub fn new(config: ManagerConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                registry: Arc::new(Registry::default()),
                corruption: CorruptionSlot::default(),
                communicator: RwLock::new(None),
            }),
        })
    }

    /// The configuration this manager was created with.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Opens (or creates) a store and returns a new handle on it.
    ///
    /// # Errors
    ///
    /// - `InvalidArgs` for a malformed identifier or configuration, a missing
    ///   `data_dir`, or a memory setting that differs from an open instance.
    /// - `NotSupported` for an encrypted memory store.
    /// - `NotFound` when the store is absent and `create_if_missing` is off.
    /// - `InvalidPassword` when the password does not unlock the store or
    ///   differs from the one an open instance uses.
    /// - `Corrupted` when the store fails an integrity check. The corruption
    ///   handler runs before this is returned.
    /// - `Busy` when another process holds the store.
    pub fn open(&self, store_id: &str, config: StoreConfig) -> CoreResult<Delegate> {
        validate_identifier("store", store_id)?;
        config.validate()?;
        let key = StoreKey {
            store_id: store_id.to_owned(),
            kind: config.kind(),
        };
        let handle = HandleId::new();
        let opened = {
            let mut stores = self.inner.registry.stores.lock();
            match stores.get(&key) {
                Some(store) => {
                    store.check_reopen(&config)?;
                    store.attach(handle);
                    Ok(Arc::clone(store))
                }
                None => self.open_store(store_id, &config).map(|store| {
                    let store = Arc::new(store);
                    store.attach(handle);
                    stores.insert(key, Arc::clone(&store));
                    store
                }),
            }
        };
        match opened {
            Ok(store) => Ok(Delegate::new(
                store,
                Arc::clone(&self.inner.registry),
                handle,
                store_id.to_owned(),
            )),
            Err(e) => {
                if e.is_corruption() {
                    self.inner.corruption.fire(&CorruptionInfo {
                        app_id: self.inner.config.app_id.clone(),
                        user_id: self.inner.config.user_id.clone(),
                        store_id: store_id.to_owned(),
                        message: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    fn open_store(&self, store_id: &str, config: &StoreConfig) -> CoreResult<Store> {
        let identity = StoreIdentity {
            app_id: self.inner.config.app_id.clone(),
            user_id: self.inner.config.user_id.clone(),
            store_id: store_id.to_owned(),
        };
        if config.is_memory_db {
            return Store::open(identity, None, config, self.inner.corruption.clone());
        }
        let data_dir = &self.inner.config.data_dir;
        if !data_dir.is_dir() {
            return Err(CoreError::invalid_args(format!(
                "data directory {} does not exist",
                data_dir.display()
            )));
        }
        let path = self.store_root(store_id).join(config.kind().dir_name());
        Store::open(identity, Some(&path), config, self.inner.corruption.clone())
    }

    /// Closes a handle. Same as [`Delegate::close`].
    pub fn close(&self, delegate: &Delegate) -> CoreResult<()> {
        delegate.close()
    }

    /// Removes every file of a store. Fails with `Busy` while any handle on
    /// it is open, here or in another process, and `NotFound` when nothing is
    /// stored under the identifier.
    pub fn delete_store(&self, store_id: &str) -> CoreResult<()> {
        validate_identifier("store", store_id)?;
        let stores = self.inner.registry.stores.lock();
        if stores.keys().any(|key| key.store_id == store_id) {
            return Err(CoreError::busy(format!("store {store_id} has open handles")));
        }
        let root = self.store_root(store_id);
        if !root.is_dir() {
            return Err(CoreError::not_found(format!("store {store_id}")));
        }
        // Taking each lock proves no other process has the store open.
        let mut locks = Vec::new();
        for kind in [StoreKind::MultiVersion, StoreKind::SingleVersion] {
            let path = root.join(kind.dir_name());
            match StoreDir::open(&path, false) {
                Ok(lock) => locks.push(lock),
                Err(CoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        drop(locks);
        fs::remove_dir_all(&root)?;
        drop(stores);
        info!(store = store_id, "deleted store");
        Ok(())
    }

    /// Bytes used on disk by a store, both kinds together.
    pub fn store_disk_size(&self, store_id: &str) -> CoreResult<u64> {
        validate_identifier("store", store_id)?;
        let root = self.store_root(store_id);
        if !root.is_dir() {
            return Err(CoreError::not_found(format!("store {store_id}")));
        }
        Ok(atomic::dir_size(&root)?)
    }

    /// Directory a persistent store of the given kind lives in.
    pub fn store_path(&self, store_id: &str, local_only: bool) -> CoreResult<PathBuf> {
        validate_identifier("store", store_id)?;
        Ok(self
            .store_root(store_id)
            .join(StoreKind::from_local_only(local_only).dir_name()))
    }

    /// Installs the corruption handler, replacing any previous one. `None`
    /// removes it.
    pub fn set_corruption_handler(&self, handler: Option<CorruptionHandler>) {
        debug!(installed = handler.is_some(), "corruption handler updated");
        self.inner.corruption.set(handler);
    }

    /// Installs the transport a replication layer should use.
    pub fn set_process_communicator(&self, communicator: Option<Arc<dyn ProcessCommunicator>>) {
        *self.inner.communicator.write() = communicator;
    }

    /// The installed transport, if any.
    #[must_use]
    pub fn process_communicator(&self) -> Option<Arc<dyn ProcessCommunicator>> {
        self.inner.communicator.read().clone()
    }

    fn store_root(&self, store_id: &str) -> PathBuf {
        let config = &self.inner.config;
        let digest = Sha256::digest(
            format!("{}-{}-{}", config.user_id, config.app_id, store_id).as_bytes(),
        );
        let mut name = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(name, "{byte:02x}");
        }
        config.data_dir.join(name)
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("app_id", &self.inner.config.app_id)
            .field("user_id", &self.inner.config.user_id)
            .field("open_stores", &self.inner.registry.stores.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherPassword;
    use crate::types::Partition;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path) -> Manager {
        Manager::new(ManagerConfig::new(dir, "app", "user")).unwrap()
    }

    #[test]
    fn rejects_bad_identifiers() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Manager::new(ManagerConfig::new(dir.path(), "bad id", "user")),
            Err(CoreError::InvalidArgs { .. })
        ));
        let manager = manager(dir.path());
        assert!(matches!(
            manager.open("", StoreConfig::new()),
            Err(CoreError::InvalidArgs { .. })
        ));
        assert!(matches!(
            manager.open(&"s".repeat(129), StoreConfig::new()),
            Err(CoreError::InvalidArgs { .. })
        ));
    }

    #[test]
    fn handles_share_one_store() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let a = manager.open("shared", StoreConfig::new()).unwrap();
        let b = manager.open("shared", StoreConfig::new()).unwrap();
        a.put(Partition::Native, b"k", b"v").unwrap();
        assert_eq!(b.get(Partition::Native, b"k").unwrap(), b"v");
        manager.close(&a).unwrap();
        assert!(matches!(a.get(Partition::Native, b"k"), Err(CoreError::HandleClosed)));
        manager.close(&b).unwrap();
        let c = manager.open("shared", StoreConfig::new()).unwrap();
        assert_eq!(c.get(Partition::Native, b"k").unwrap(), b"v");
    }

    #[test]
    fn reopen_must_match() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let pwd = CipherPassword::new("pw").unwrap();
        let _open = manager
            .open("enc", StoreConfig::new().encrypted(pwd))
            .unwrap();
        let other = CipherPassword::new("other").unwrap();
        assert!(matches!(
            manager.open("enc", StoreConfig::new().encrypted(other)),
            Err(CoreError::InvalidPassword)
        ));
        assert!(matches!(
            manager.open("enc", StoreConfig::new().memory(true)),
            Err(CoreError::InvalidArgs { .. })
        ));
    }

    #[test]
    fn delete_store_rules() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        assert!(matches!(
            manager.delete_store("absent"),
            Err(CoreError::NotFound { .. })
        ));
        let delegate = manager.open("doomed", StoreConfig::new()).unwrap();
        delegate.put(Partition::Native, b"k", b"v").unwrap();
        assert!(matches!(manager.delete_store("doomed"), Err(CoreError::Busy { .. })));
        assert!(manager.store_disk_size("doomed").unwrap() > 0);
        manager.close(&delegate).unwrap();
        manager.delete_store("doomed").unwrap();
        assert!(matches!(
            manager.store_disk_size("doomed"),
            Err(CoreError::NotFound { .. })
        ));
        let fresh = manager.open("doomed", StoreConfig::new()).unwrap();
        assert!(matches!(
            fresh.get(Partition::Native, b"k"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn memory_store_is_discarded_at_last_close() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let config = StoreConfig::new().memory(true);
        let delegate = manager.open("mem", config.clone()).unwrap();
        delegate.put(Partition::LocalOnly, b"k", b"v").unwrap();
        manager.close(&delegate).unwrap();
        let again = manager.open("mem", config).unwrap();
        assert!(matches!(
            again.get(Partition::LocalOnly, b"k"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn missing_store_without_create() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        assert!(matches!(
            manager.open("absent", StoreConfig::new().create_if_missing(false)),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn native_and_local_stores_are_separate() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let native = manager.open("s", StoreConfig::new()).unwrap();
        let local = manager.open("s", StoreConfig::new().local_only(true)).unwrap();
        native.put(Partition::Native, b"k", b"n").unwrap();
        assert!(local.get(Partition::Native, b"k").is_err());
        assert_ne!(
            manager.store_path("s", false).unwrap(),
            manager.store_path("s", true).unwrap()
        );
    }
}
