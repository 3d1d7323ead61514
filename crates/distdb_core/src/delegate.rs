//! Per-caller handle on an open store.

use crate::crypto::CipherPassword;
use crate::error::{CoreError, CoreResult};
use crate::manager::Registry;
use crate::observer::{KeyFilter, Observer, ObserverMode};
use crate::result_set::ResultSet;
use crate::store::Store;
use crate::sync_access::{ConflictMask, ConflictNotifier, SyncAccess};
use crate::types::{Entry, HandleId, Partition, StoreKind};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A handle on an open store, returned by [`Manager::open`].
///
/// Every handle opened on the same identifier shares one store: a write made
/// through one handle is visible to the others as soon as it commits. Each
/// handle has its own transaction slot, observers, result sets and conflict
/// notifier, all of which are released when the handle closes.
///
/// # Transactions
///
/// Between [`start_transaction`](Self::start_transaction) and
/// [`commit`](Self::commit) or [`rollback`](Self::rollback), mutations made
/// through this handle are buffered. Reads through this handle see them;
/// other handles do not, and their writes get `Busy` until the transaction
/// ends. At most 128 operations fit in one transaction.
///
/// ```rust,ignore
/// let delegate = manager.open("notes", StoreConfig::new())?;
/// delegate.start_transaction()?;
/// delegate.put(Partition::Native, b"a", b"1")?;
/// delegate.delete(Partition::LocalOnly, b"draft")?;
/// delegate.commit()?;
/// ```
///
/// Dropping a handle closes it, discarding any open transaction.
///
/// [`Manager::open`]: crate::Manager::open
pub struct Delegate {
    /// Shared store; `None` once closed.
    store: RwLock<Option<Arc<Store>>>,
    /// Open stores of the owning manager.
    registry: Arc<Registry>,
    /// This handle.
    handle: HandleId,
    /// Identifier the store was opened under.
    store_id: String,
    /// Store flavor.
    kind: StoreKind,
    /// True for a memory store.
    memory: bool,
}

impl Delegate {
    pub(crate) fn new(
        store: Arc<Store>,
        registry: Arc<Registry>,
        handle: HandleId,
        store_id: String,
    ) -> Self {
        let kind = store.kind();
        let memory = store.is_memory();
        Self {
            store: RwLock::new(Some(store)),
            registry,
            handle,
            store_id,
            kind,
            memory,
        }
    }

    fn store(&self) -> CoreResult<Arc<Store>> {
        self.store.read().clone().ok_or(CoreError::HandleClosed)
    }

    // ---- entries ----

    /// Reads the value stored under `key`.
    ///
    /// Inside a transaction this handle's pending writes take precedence.
    ///
    /// # Errors
    ///
    /// `NotFound` when the key is absent, `InvalidArgs` for an empty or
    /// oversized key, `Busy` while an import or rekey runs.
    pub fn get(&self, partition: Partition, key: &[u8]) -> CoreResult<Vec<u8>> {
        self.store()?.get(self.handle, partition, key)
    }

    /// Every entry whose key starts with `prefix`, in ascending key order.
    /// An empty prefix selects the whole partition; no match is `NotFound`.
    pub fn get_entries(&self, partition: Partition, prefix: &[u8]) -> CoreResult<Vec<Entry>> {
        self.store()?.get_entries(self.handle, partition, prefix)
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// - `InvalidArgs` for an empty key, a key over 1024 bytes or a value
    ///   over 4 MiB.
    /// - `OverMaxLimits` when the open transaction has no budget left.
    /// - `Busy` while another handle holds a transaction, or an export,
    ///   import or rekey runs.
    pub fn put(
        &self,
        partition: Partition,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> CoreResult<()> {
        let (key, value) = (key.into(), value.into());
        self.store()?
            .mutate(self.handle, |txn| txn.put(partition, key, value))
    }

    /// Removes `key`. Removing an absent key succeeds.
    pub fn delete(&self, partition: Partition, key: &[u8]) -> CoreResult<()> {
        let key = key.to_vec();
        self.store()?
            .mutate(self.handle, |txn| txn.delete(partition, key))
    }

    /// Stores every entry or none. A key given twice keeps its last value.
    /// The batch costs one budget unit per entry.
    pub fn put_batch(&self, partition: Partition, entries: Vec<Entry>) -> CoreResult<()> {
        self.store()?
            .mutate(self.handle, |txn| txn.put_batch(partition, entries))
    }

    /// Removes every key or none. Absent keys are not an error.
    pub fn delete_batch(&self, partition: Partition, keys: Vec<Vec<u8>>) -> CoreResult<()> {
        self.store()?
            .mutate(self.handle, |txn| txn.delete_batch(partition, keys))
    }

    /// Opens a lazy iterator over the committed entries under `prefix`.
    ///
    /// At most four sets may be open per handle. A set blocks import and
    /// rekey, and keeps the handle from closing, until it is closed or
    /// dropped.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches, `OverMaxLimits` past the per-handle
    /// limit, `Busy` inside a transaction on this handle.
    pub fn open_result_set(&self, partition: Partition, prefix: &[u8]) -> CoreResult<ResultSet> {
        let store = self.store()?;
        let items = store.open_result_set(self.handle, partition, prefix)?;
        Ok(ResultSet::new(&store, self.handle, partition, items))
    }

    // ---- transactions ----

    /// Begins a transaction on this handle.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when this handle already has one, `Busy` when
    /// another handle does or an export, import or rekey runs.
    pub fn start_transaction(&self) -> CoreResult<()> {
        self.store()?.start_transaction(self.handle)
    }

    /// Applies the open transaction atomically and notifies observers before
    /// returning.
    pub fn commit(&self) -> CoreResult<()> {
        self.store()?.commit(self.handle)
    }

    /// Discards the open transaction.
    pub fn rollback(&self) -> CoreResult<()> {
        self.store()?.rollback(self.handle)
    }

    // ---- observers ----

    /// Subscribes `observer` to committed changes of one partition.
    ///
    /// # Errors
    ///
    /// - `Busy` while any handle holds a transaction or an import or rekey
    ///   runs.
    /// - `InvalidOperation` when the same observer is already registered.
    /// - `InvalidArgs` for a key filter over 1024 bytes.
    pub fn register_observer(
        &self,
        filter: KeyFilter,
        mode: ObserverMode,
        observer: Arc<dyn Observer>,
    ) -> CoreResult<()> {
        self.store()?
            .register_observer(self.handle, mode, filter, observer)
    }

    /// Removes every subscription of `observer` made through this handle.
    pub fn unregister_observer(&self, observer: &Arc<dyn Observer>) -> CoreResult<()> {
        self.store()?.unregister_observer(self.handle, observer)
    }

    /// Installs (or with `None`, removes) this handle's conflict notifier.
    ///
    /// Local-only stores never see conflicts and return `NotSupported`. An
    /// empty mask is `InvalidArgs`.
    pub fn set_conflict_notifier(
        &self,
        mask: ConflictMask,
        notifier: Option<Arc<dyn ConflictNotifier>>,
    ) -> CoreResult<()> {
        if self.kind != StoreKind::MultiVersion {
            return Err(CoreError::not_supported(
                "conflict notifier on a local-only store",
            ));
        }
        if notifier.is_some() && mask.is_empty() {
            return Err(CoreError::invalid_args("conflict mask is empty"));
        }
        self.store()?
            .set_conflict_notifier(self.handle, notifier.map(|n| (mask, n)))
    }

    /// Native-partition access for a replication layer.
    pub fn sync_access(&self) -> CoreResult<SyncAccess> {
        SyncAccess::new(&self.store()?, self.handle)
    }

    // ---- backup ----

    /// Writes a backup of the whole store to `path`, sealed with `password`
    /// unless it is empty.
    ///
    /// # Errors
    ///
    /// - `InvalidArgs` when the parent directory does not exist.
    /// - `FileAlreadyExisted` when `path` exists.
    /// - `NotSupported` on a memory store.
    /// - `Busy` while a transaction is open or an import or rekey runs.
    pub fn export(&self, path: impl AsRef<Path>, password: &CipherPassword) -> CoreResult<()> {
        self.store()?.export(path.as_ref(), password)
    }

    /// Replaces the store content with a backup.
    ///
    /// Only this handle may be open on the store, with no observers,
    /// conflict notifiers, result sets or transaction. A failed or
    /// interrupted import leaves the previous content in place.
    ///
    /// # Errors
    ///
    /// - `InvalidFile` for a missing or damaged file, a password that does not
    ///   match, or a backup of the other store kind.
    /// - `Busy` when any of the conditions above is not met.
    /// - `NotSupported` on a memory store.
    pub fn import(&self, path: impl AsRef<Path>, password: &CipherPassword) -> CoreResult<()> {
        self.store()?.import(self.handle, path.as_ref(), password)
    }

    /// Re-encrypts the store under `password`; an empty password removes
    /// encryption. Same exclusivity rules as [`import`](Self::import).
    pub fn rekey(&self, password: &CipherPassword) -> CoreResult<()> {
        self.store()?.rekey(self.handle, password)
    }

    // ---- metadata ----

    /// Identifier the store was opened under.
    #[must_use]
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Store flavor.
    #[must_use]
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// True for a memory store.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.memory
    }

    /// This handle's id.
    #[must_use]
    pub fn handle_id(&self) -> HandleId {
        self.handle
    }

    /// Schema text recorded when the store was created.
    pub fn schema(&self) -> CoreResult<Option<String>> {
        Ok(self.store()?.schema().map(str::to_owned))
    }

    /// Directory of a persistent store; `None` for memory stores.
    pub fn path(&self) -> CoreResult<Option<PathBuf>> {
        Ok(self.store()?.path())
    }

    /// True until the handle is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.store.read().is_some()
    }

    // ---- lifecycle ----

    /// Closes the handle.
    ///
    /// Any open transaction is discarded and the handle's observers and
    /// conflict notifier are dropped. Closing the last handle checkpoints a
    /// persistent store and releases its directory lock; a memory store is
    /// discarded. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// `Busy` while result sets opened through this handle are still open.
    pub fn close(&self) -> CoreResult<()> {
        self.close_inner(false)
    }

    fn close_inner(&self, force: bool) -> CoreResult<()> {
        let store = {
            let mut slot = self.store.write();
            let Some(store) = slot.as_ref() else {
                return Ok(());
            };
            let remaining = store.detach(self.handle, force)?;
            debug!(store = %self.store_id, handle = %self.handle, remaining, "handle closed");
            slot.take()
        };
        if let Some(store) = store {
            self.registry.release(&store);
        }
        Ok(())
    }
}

impl Drop for Delegate {
    fn drop(&mut self) {
        let _ = self.close_inner(true);
    }
}

impl std::fmt::Debug for Delegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegate")
            .field("store_id", &self.store_id)
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("memory", &self.memory)
            .field("open", &self.is_open())
            .finish()
    }
}
