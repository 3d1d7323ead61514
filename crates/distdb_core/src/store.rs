//! The shared state behind every delegate handle of one store.
//!
//! All exclusivity decisions are taken under one state mutex: which handle
//! owns the transaction, whether an export or a structural swap (import,
//! rekey) runs, how many implicit writes are in flight, and what each
//! handle holds open. Data access goes through the [`TransactionManager`],
//! whose engine lock is always taken after the state mutex, never before.

use crate::backup;
use crate::config::StoreConfig;
use crate::corruption::{CorruptionInfo, CorruptionSlot};
use crate::crypto::{CipherPassword, CryptoManager};
use crate::dir::{StoreDir, SwapRecovery};
use crate::engine::{write_segment_file, Engine, EngineOptions};
use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use crate::observer::{KeyFilter, NotificationHub, Observer, ObserverMode};
use crate::segment::RecordPointer;
use crate::sync_access::{ConflictData, ConflictMask, ConflictNotifier};
use crate::transaction::{PendingWrite, Transaction, TransactionManager};
use crate::types::{
    validate_key, validate_prefix, Entry, HandleId, Partition, StoreKind,
    MAX_RESULT_SETS_PER_HANDLE,
};
use distdb_storage::FileBackend;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Who a store belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoreIdentity {
    pub(crate) app_id: String,
    pub(crate) user_id: String,
    pub(crate) store_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Structural {
    Import,
    Rekey,
}

#[derive(Default)]
struct HandleSlot {
    result_sets: usize,
    conflict: Option<(ConflictMask, Arc<dyn ConflictNotifier>)>,
}

#[derive(Default)]
struct StoreState {
    handles: HashMap<HandleId, HandleSlot>,
    txn: Option<(HandleId, Transaction)>,
    exporting: bool,
    structural: Option<Structural>,
    writers: usize,
    corrupted: Option<String>,
}

impl StoreState {
    fn ensure_healthy(&self) -> CoreResult<()> {
        match &self.corrupted {
            Some(message) => Err(CoreError::corrupted(message.clone())),
            None => Ok(()),
        }
    }

    fn ensure_attached(&self, handle: HandleId) -> CoreResult<()> {
        if self.handles.contains_key(&handle) {
            Ok(())
        } else {
            Err(CoreError::HandleClosed)
        }
    }

    fn ensure_readable(&self) -> CoreResult<()> {
        self.ensure_healthy()?;
        match self.structural {
            Some(Structural::Import) => Err(CoreError::busy("import in progress")),
            Some(Structural::Rekey) => Err(CoreError::busy("rekey in progress")),
            None => Ok(()),
        }
    }

    /// Rejects a write that would contend with another exclusivity holder.
    fn ensure_writable(&self, handle: HandleId) -> CoreResult<()> {
        self.ensure_attached(handle)?;
        self.ensure_readable()?;
        if self.exporting {
            return Err(CoreError::busy("export in progress"));
        }
        match &self.txn {
            Some((owner, _)) if *owner != handle => {
                Err(CoreError::busy("another handle holds a transaction"))
            }
            _ => Ok(()),
        }
    }

    fn own_txn(&mut self, handle: HandleId) -> Option<&mut Transaction> {
        match self.txn.as_mut() {
            Some((owner, txn)) if *owner == handle => Some(txn),
            _ => None,
        }
    }

    fn slot(&mut self, handle: HandleId) -> CoreResult<&mut HandleSlot> {
        self.handles.get_mut(&handle).ok_or(CoreError::HandleClosed)
    }
}

/// One open store, shared by all of its handles.
pub(crate) struct Store {
    identity: StoreIdentity,
    kind: StoreKind,
    memory: bool,
    schema: Option<String>,
    dir: Option<StoreDir>,
    options: EngineOptions,
    password: Mutex<CipherPassword>,
    manifest: Mutex<Option<Manifest>>,
    cipher: Mutex<Option<Arc<CryptoManager>>>,
    txns: TransactionManager,
    hub: NotificationHub,
    state: Mutex<StoreState>,
    export_lock: Mutex<()>,
    import_lock: Mutex<()>,
    corruption: CorruptionSlot,
}

impl Store {
    /// Opens a store. `path` is `None` for memory stores.
    pub(crate) fn open(
        identity: StoreIdentity,
        path: Option<&Path>,
        config: &StoreConfig,
        corruption: CorruptionSlot,
    ) -> CoreResult<Self> {
        let kind = config.kind();
        let options = EngineOptions {
            sync_on_commit: config.sync_on_commit,
            checkpoint_threshold: config.checkpoint_threshold,
        };
        let (dir, manifest, cipher, engine) = match path {
            None => (None, None, None, Engine::in_memory()?),
            Some(path) => {
                let dir = StoreDir::open(path, config.create_if_missing)?;
                if dir.recover_swap()? != SwapRecovery::Clean {
                    info!(store = %identity.store_id, "settled interrupted swap");
                }
                let (manifest, cipher) = match dir.load_manifest()? {
                    Some(manifest) => {
                        if manifest.kind != kind {
                            return Err(CoreError::corrupted(format!(
                                "manifest records a {:?} store in a {kind:?} directory",
                                manifest.kind
                            )));
                        }
                        let cipher = manifest.unlock(&config.cipher_password)?;
                        (manifest, cipher)
                    }
                    None => {
                        let (manifest, cipher) = Manifest::create(
                            kind,
                            &config.cipher_password,
                            config.schema.clone(),
                        )?;
                        dir.save_manifest(&manifest)?;
                        info!(store = %identity.store_id, ?kind, "created store");
                        (manifest, cipher)
                    }
                };
                let cipher = cipher.map(Arc::new);
                let engine = open_engine(&dir, cipher.clone(), options)?;
                (Some(dir), Some(manifest), cipher, engine)
            }
        };
        let schema = match &manifest {
            Some(manifest) => manifest.schema.clone(),
            None => config.schema.clone(),
        };
        info!(
            store = %identity.store_id,
            memory = path.is_none(),
            encrypted = cipher.is_some(),
            live = engine.live_count(),
            "store opened"
        );
        let store = Self {
            identity,
            kind,
            memory: path.is_none(),
            schema,
            dir,
            options,
            password: Mutex::new(config.cipher_password.clone()),
            manifest: Mutex::new(manifest),
            cipher: Mutex::new(cipher),
            txns: TransactionManager::new(engine),
            hub: NotificationHub::new(),
            state: Mutex::new(StoreState::default()),
            export_lock: Mutex::new(()),
            import_lock: Mutex::new(()),
            corruption,
        };
        store.compact_if_needed();
        Ok(store)
    }

    pub(crate) fn identity(&self) -> &StoreIdentity {
        &self.identity
    }

    pub(crate) fn kind(&self) -> StoreKind {
        self.kind
    }

    pub(crate) fn is_memory(&self) -> bool {
        self.memory
    }

    pub(crate) fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Checks that a second open asks for the store as it is.
    pub(crate) fn check_reopen(&self, config: &StoreConfig) -> CoreResult<()> {
        if config.is_memory_db != self.memory {
            return Err(CoreError::invalid_args(
                "store is already open with a different memory setting",
            ));
        }
        if *self.password.lock() != config.cipher_password {
            return Err(CoreError::InvalidPassword);
        }
        Ok(())
    }

    // ---- handles ----

    pub(crate) fn attach(&self, handle: HandleId) {
        self.state.lock().handles.insert(handle, HandleSlot::default());
        debug!(store = %self.identity.store_id, %handle, "handle attached");
    }

    /// Releases a handle: its transaction is discarded and its subscriptions
    /// dropped. Returns how many handles remain. Without `force`, a handle
    /// with open result sets is kept and `Busy` returned.
    pub(crate) fn detach(&self, handle: HandleId, force: bool) -> CoreResult<usize> {
        let remaining = {
            let mut state = self.state.lock();
            let slot = state.slot(handle)?;
            if slot.result_sets > 0 && !force {
                return Err(CoreError::busy(format!(
                    "{} result sets still open",
                    slot.result_sets
                )));
            }
            state.handles.remove(&handle);
            if matches!(&state.txn, Some((owner, _)) if *owner == handle) {
                state.txn = None;
                debug!(%handle, "discarded transaction of closing handle");
            }
            let removed = self.hub.remove_owner(handle);
            if removed > 0 {
                debug!(%handle, removed, "dropped observers of closing handle");
            }
            state.handles.len()
        };
        Ok(remaining)
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Compacts if worthwhile and checkpoints after the last handle closed.
    pub(crate) fn shutdown(&self) {
        if self.memory {
            return;
        }
        self.compact_if_needed();
        if let Err(e) = self.txns.checkpoint() {
            warn!(store = %self.identity.store_id, error = %e, "checkpoint at close failed");
        }
        info!(store = %self.identity.store_id, "store closed");
    }

    // ---- reads ----

    pub(crate) fn get(
        &self,
        handle: HandleId,
        partition: Partition,
        key: &[u8],
    ) -> CoreResult<Vec<u8>> {
        validate_key(key)?;
        {
            let mut state = self.state.lock();
            state.ensure_attached(handle)?;
            state.ensure_readable()?;
            if let Some(txn) = state.own_txn(handle) {
                match txn.pending(partition, key) {
                    Some(PendingWrite::Put(value)) => return Ok(value.clone()),
                    Some(PendingWrite::Delete) => return Err(CoreError::not_found("key")),
                    None => {}
                }
            }
        }
        let value = self.checked(|| self.txns.read().get(partition, key))?;
        value.ok_or_else(|| CoreError::not_found("key"))
    }

    pub(crate) fn get_entries(
        &self,
        handle: HandleId,
        partition: Partition,
        prefix: &[u8],
    ) -> CoreResult<Vec<Entry>> {
        validate_prefix(prefix)?;
        {
            let state = self.state.lock();
            state.ensure_attached(handle)?;
            state.ensure_readable()?;
        }
        let committed = self.checked(|| self.txns.read().scan(partition, prefix))?;
        let entries = match self.state.lock().own_txn(handle) {
            Some(txn) => txn.overlay(partition, prefix, committed)?,
            None => committed,
        };
        if entries.is_empty() {
            return Err(CoreError::not_found("entries under prefix"));
        }
        Ok(entries)
    }

    pub(crate) fn open_result_set(
        &self,
        handle: HandleId,
        partition: Partition,
        prefix: &[u8],
    ) -> CoreResult<Vec<(Vec<u8>, RecordPointer)>> {
        validate_prefix(prefix)?;
        {
            let mut state = self.state.lock();
            state.ensure_readable()?;
            if state.own_txn(handle).is_some() {
                return Err(CoreError::busy(
                    "result sets cannot be created inside a transaction",
                ));
            }
            let slot = state.slot(handle)?;
            if slot.result_sets >= MAX_RESULT_SETS_PER_HANDLE {
                return Err(CoreError::over_max_limits(format!(
                    "at most {MAX_RESULT_SETS_PER_HANDLE} result sets per handle"
                )));
            }
            slot.result_sets += 1;
        }
        let pointers = self.txns.read().scan_pointers(partition, prefix);
        if pointers.is_empty() {
            self.release_result_set(handle);
            return Err(CoreError::not_found("entries under prefix"));
        }
        Ok(pointers)
    }

    pub(crate) fn release_result_set(&self, handle: HandleId) {
        if let Some(slot) = self.state.lock().handles.get_mut(&handle) {
            slot.result_sets = slot.result_sets.saturating_sub(1);
        }
    }

    pub(crate) fn read_pointer(
        &self,
        handle: HandleId,
        pointer: RecordPointer,
    ) -> CoreResult<Vec<u8>> {
        {
            let state = self.state.lock();
            state.ensure_attached(handle)?;
            state.ensure_healthy()?;
        }
        self.checked(|| self.txns.read().read_value(pointer))
    }

    // ---- writes ----

    /// Stages a mutation in the handle's transaction, or commits it on its
    /// own when the handle has none.
    pub(crate) fn mutate(
        &self,
        handle: HandleId,
        stage: impl FnOnce(&mut Transaction) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let mut txn = {
            let mut state = self.state.lock();
            state.ensure_writable(handle)?;
            if let Some(txn) = state.own_txn(handle) {
                return stage(txn);
            }
            state.writers += 1;
            Transaction::new()
        };
        let changes = self.checked(|| {
            let _writer = WriterGuard(self);
            stage(&mut txn)?;
            self.txns.commit(&mut txn)
        })?;
        self.hub.dispatch(&changes);
        self.compact_if_needed();
        Ok(())
    }

    pub(crate) fn start_transaction(&self, handle: HandleId) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.ensure_attached(handle)?;
        state.ensure_readable()?;
        match &state.txn {
            Some((owner, _)) if *owner == handle => {
                return Err(CoreError::invalid_operation("transaction already active"))
            }
            Some(_) => return Err(CoreError::busy("another handle holds a transaction")),
            None => {}
        }
        if state.exporting {
            return Err(CoreError::busy("export in progress"));
        }
        state.txn = Some((handle, Transaction::new()));
        debug!(%handle, "transaction started");
        Ok(())
    }

    pub(crate) fn commit(&self, handle: HandleId) -> CoreResult<()> {
        let mut txn = {
            let mut state = self.state.lock();
            match state.txn.take() {
                Some((owner, txn)) if owner == handle => {
                    state.writers += 1;
                    txn
                }
                other => {
                    state.txn = other;
                    return Err(CoreError::invalid_operation("no active transaction"));
                }
            }
        };
        let ops = txn.op_count();
        let changes = self.checked(|| {
            let _writer = WriterGuard(self);
            self.txns.commit(&mut txn)
        })?;
        debug!(%handle, ops, sequence = %changes.sequence, "transaction committed");
        self.hub.dispatch(&changes);
        self.compact_if_needed();
        Ok(())
    }

    pub(crate) fn rollback(&self, handle: HandleId) -> CoreResult<()> {
        let mut state = self.state.lock();
        match state.txn.take() {
            Some((owner, _)) if owner == handle => {
                debug!(%handle, "transaction rolled back");
                Ok(())
            }
            other => {
                state.txn = other;
                Err(CoreError::invalid_operation("no active transaction"))
            }
        }
    }

    // ---- observers and conflict notifiers ----

    pub(crate) fn register_observer(
        &self,
        handle: HandleId,
        mode: ObserverMode,
        filter: KeyFilter,
        observer: Arc<dyn Observer>,
    ) -> CoreResult<()> {
        let state = self.state.lock();
        state.ensure_attached(handle)?;
        state.ensure_readable()?;
        if state.txn.is_some() {
            return Err(CoreError::busy("transaction in progress"));
        }
        self.hub.register(handle, mode, filter, observer)
    }

    pub(crate) fn unregister_observer(
        &self,
        handle: HandleId,
        observer: &Arc<dyn Observer>,
    ) -> CoreResult<()> {
        self.hub.unregister(handle, observer)
    }

    pub(crate) fn set_conflict_notifier(
        &self,
        handle: HandleId,
        notifier: Option<(ConflictMask, Arc<dyn ConflictNotifier>)>,
    ) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.ensure_readable()?;
        state.slot(handle)?.conflict = notifier;
        Ok(())
    }

    /// Delivers `conflict` to every notifier whose mask includes its type.
    /// Returns how many were invoked.
    pub(crate) fn report_conflict(&self, conflict: &ConflictData) -> usize {
        let targets: Vec<Arc<dyn ConflictNotifier>> = self
            .state
            .lock()
            .handles
            .values()
            .filter_map(|slot| slot.conflict.as_ref())
            .filter(|(mask, _)| mask.contains(conflict.conflict_type))
            .map(|(_, notifier)| Arc::clone(notifier))
            .collect();
        for notifier in &targets {
            notifier.on_conflict(conflict);
        }
        targets.len()
    }

    // ---- export, import, rekey ----

    pub(crate) fn export(&self, path: &Path, password: &CipherPassword) -> CoreResult<()> {
        let result = self.export_locked(path, password);
        self.checked(|| result)
    }

    fn export_locked(&self, path: &Path, password: &CipherPassword) -> CoreResult<()> {
        if self.memory {
            return Err(CoreError::not_supported("export of a memory store"));
        }
        backup::check_parent_dir(path)?;
        let _queue = self.export_lock.lock();
        {
            let mut state = self.state.lock();
            state.ensure_readable()?;
            if state.txn.is_some() {
                return Err(CoreError::busy("transaction in progress"));
            }
            state.exporting = true;
        }
        let _exporting = ExportGuard(self);
        let (sequence, entries) = {
            let engine = self.txns.read();
            (engine.sequence(), engine.snapshot()?)
        };
        let bytes = backup::encode_backup(self.kind, sequence, &entries, password)?;
        backup::write_backup_file(path, &bytes)?;
        info!(
            store = %self.identity.store_id,
            path = %path.display(),
            entries = entries.len(),
            encrypted = !password.is_empty(),
            "exported store"
        );
        Ok(())
    }

    pub(crate) fn import(
        &self,
        handle: HandleId,
        path: &Path,
        password: &CipherPassword,
    ) -> CoreResult<()> {
        let result = self.import_locked(handle, path, password);
        self.checked(|| result)
    }

    fn import_locked(
        &self,
        handle: HandleId,
        path: &Path,
        password: &CipherPassword,
    ) -> CoreResult<()> {
        if self.memory {
            return Err(CoreError::not_supported("import into a memory store"));
        }
        backup::check_parent_dir(path)?;
        // A second import through the same handle waits for the first.
        let _serial = self.import_lock.lock();
        let _swap = self.begin_structural(handle, Structural::Import)?;
        let bytes = backup::read_backup_file(path)?;
        let (meta, entries) = backup::decode_backup(&bytes, self.kind, password)?;
        let cipher = self.cipher.lock().clone();
        self.swap(&entries, cipher, None)?;
        let was_corrupted = self.state.lock().corrupted.take().is_some();
        info!(
            store = %self.identity.store_id,
            path = %path.display(),
            entries = meta.entry_count,
            repaired = was_corrupted,
            "imported backup"
        );
        Ok(())
    }

    pub(crate) fn rekey(&self, handle: HandleId, password: &CipherPassword) -> CoreResult<()> {
        let result = self.rekey_locked(handle, password);
        self.checked(|| result)
    }

    fn rekey_locked(&self, handle: HandleId, password: &CipherPassword) -> CoreResult<()> {
        if self.memory {
            return Err(CoreError::not_supported("rekey of a memory store"));
        }
        let _serial = self.import_lock.lock();
        let _swap = self.begin_structural(handle, Structural::Rekey)?;
        let current = self
            .manifest
            .lock()
            .clone()
            .ok_or_else(|| CoreError::not_supported("rekey without a manifest"))?;
        let (manifest, cipher) = current.rekeyed(password)?;
        let cipher = cipher.map(Arc::new);
        let entries = self.txns.read().snapshot()?;
        self.swap(&entries, cipher.clone(), Some(&manifest))?;
        *self.manifest.lock() = Some(manifest);
        *self.cipher.lock() = cipher;
        *self.password.lock() = password.clone();
        info!(
            store = %self.identity.store_id,
            encrypted = !password.is_empty(),
            "rekeyed store"
        );
        Ok(())
    }

    /// Claims the store for an import or rekey. Only the calling handle may
    /// be open, and it may hold nothing that pins the current content.
    fn begin_structural(&self, handle: HandleId, kind: Structural) -> CoreResult<StructuralGuard<'_>> {
        let mut state = self.state.lock();
        if state.structural.is_some() {
            return Err(CoreError::busy("import or rekey in progress"));
        }
        if kind == Structural::Rekey {
            state.ensure_healthy()?;
        }
        if state.handles.len() > 1 {
            return Err(CoreError::busy("other handles are open on this store"));
        }
        if !self.hub.is_empty() {
            return Err(CoreError::busy("observers are registered"));
        }
        if state.handles.values().any(|slot| slot.conflict.is_some()) {
            return Err(CoreError::busy("a conflict notifier is registered"));
        }
        if state.slot(handle)?.result_sets > 0 {
            return Err(CoreError::busy("result sets are open"));
        }
        if state.txn.is_some() {
            return Err(CoreError::busy("transaction in progress"));
        }
        if state.exporting {
            return Err(CoreError::busy("export in progress"));
        }
        if state.writers > 0 {
            return Err(CoreError::busy("writes in progress"));
        }
        state.structural = Some(kind);
        Ok(StructuralGuard(self))
    }

    /// Replaces the durable content with `entries` sealed under `cipher`.
    fn swap(
        &self,
        entries: &[(Partition, Entry)],
        cipher: Option<Arc<CryptoManager>>,
        manifest: Option<&Manifest>,
    ) -> CoreResult<()> {
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| CoreError::not_supported("swap on a memory store"))?;
        let mut engine = self.txns.write();
        self.rewrite(dir, &mut engine, entries, cipher, manifest)
    }

    /// Swaps in a segment file holding exactly `entries`, then reopens the
    /// engine on it. The commit sequence carries over. Nothing changes unless
    /// the swap marker is written.
    fn rewrite(
        &self,
        dir: &StoreDir,
        engine: &mut Engine,
        entries: &[(Partition, Entry)],
        cipher: Option<Arc<CryptoManager>>,
        manifest: Option<&Manifest>,
    ) -> CoreResult<()> {
        engine.checkpoint()?;
        dir.discard_staged()?;
        let staged = FileBackend::open(&dir.staged_segment_path())?;
        let sequence = engine.sequence();
        if let Err(e) = write_segment_file(Box::new(staged), cipher.clone(), entries, sequence) {
            dir.discard_staged()?;
            return Err(e);
        }
        dir.commit_swap(manifest)?;
        *engine = open_engine(dir, cipher, self.options)?;
        Ok(())
    }

    /// Drops superseded records from the segment file once they outweigh
    /// the live ones. A failure leaves the current file in use.
    fn compact_if_needed(&self) {
        if self.memory {
            return;
        }
        if let Err(e) = self.checked(|| self.compact()) {
            warn!(store = %self.identity.store_id, error = %e, "segment compaction failed");
        }
    }

    fn compact(&self) -> CoreResult<()> {
        let Some(dir) = self.dir.as_ref() else {
            return Ok(());
        };
        if !self.txns.read().needs_compaction()? {
            return Ok(());
        }
        let mut engine = {
            let state = self.state.lock();
            // Result sets point into the current file; an export or a
            // structural swap reads or replaces it.
            if state.corrupted.is_some()
                || state.structural.is_some()
                || state.exporting
                || state.handles.values().any(|slot| slot.result_sets > 0)
            {
                return Ok(());
            }
            // Locked before the state mutex is released, so a result set
            // opened meanwhile only sees the compacted file.
            self.txns.write()
        };
        if !engine.needs_compaction()? {
            return Ok(());
        }
        let before = engine.segment_size()?;
        let entries = engine.snapshot()?;
        let cipher = self.cipher.lock().clone();
        self.rewrite(dir, &mut engine, &entries, cipher, None)?;
        info!(
            store = %self.identity.store_id,
            before,
            after = engine.segment_size()?,
            live = entries.len(),
            "compacted segments"
        );
        Ok(())
    }

    // ---- corruption ----

    /// Runs `op`; an integrity failure marks the store corrupted and fires
    /// the handler the first time. Every lock and guard `op` takes must be
    /// released by the time it returns.
    fn checked<T>(&self, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        let result = op();
        if let Err(e) = &result {
            if e.is_corruption() {
                self.mark_corrupted(e.to_string());
            }
        }
        result
    }

    fn mark_corrupted(&self, message: String) {
        let first = {
            let mut state = self.state.lock();
            if state.corrupted.is_some() {
                false
            } else {
                state.corrupted = Some(message.clone());
                true
            }
        };
        if first {
            self.corruption.fire(&CorruptionInfo {
                app_id: self.identity.app_id.clone(),
                user_id: self.identity.user_id.clone(),
                store_id: self.identity.store_id.clone(),
                message,
            });
        }
    }

    /// Directory of a persistent store.
    pub(crate) fn path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.path().to_path_buf())
    }
}

fn open_engine(
    dir: &StoreDir,
    cipher: Option<Arc<CryptoManager>>,
    options: EngineOptions,
) -> CoreResult<Engine> {
    Engine::open(
        Box::new(FileBackend::open(&dir.wal_path())?),
        Box::new(FileBackend::open(&dir.segment_path())?),
        cipher,
        options,
    )
}

struct WriterGuard<'a>(&'a Store);

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.0.state.lock().writers -= 1;
    }
}

struct ExportGuard<'a>(&'a Store);

impl Drop for ExportGuard<'_> {
    fn drop(&mut self) {
        self.0.state.lock().exporting = false;
    }
}

struct StructuralGuard<'a>(&'a Store);

impl Drop for StructuralGuard<'_> {
    fn drop(&mut self) {
        self.0.state.lock().structural = None;
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("store_id", &self.identity.store_id)
            .field("kind", &self.kind)
            .field("memory", &self.memory)
            .field("handles", &self.handle_count())
            .finish_non_exhaustive()
    }
}
