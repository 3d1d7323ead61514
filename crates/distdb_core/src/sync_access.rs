//! Narrow surface for a replication layer.
//!
//! A synchronizer only ever touches the native partition. Remote writes
//! applied through [`SyncAccess`] that overwrite or remove a different local
//! value are reported to the conflict notifiers registered on the store.

use crate::error::{CoreError, CoreResult};
use crate::store::Store;
use crate::types::{HandleId, Partition, StoreKind};
use std::sync::{Arc, Weak};

/// Kind of a replication conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictType {
    /// A remote entry clashed with another remote entry.
    ForeignKeyOnly,
    /// A remote entry clashed with a local entry that came from a peer.
    ForeignKeyOrigin,
    /// A remote entry replaced or removed a native local entry.
    NativeAll,
}

impl ConflictType {
    const fn bit(self) -> u8 {
        match self {
            Self::ForeignKeyOnly => 0x01,
            Self::ForeignKeyOrigin => 0x02,
            Self::NativeAll => 0x04,
        }
    }
}

/// Set of conflict types a notifier wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConflictMask(u8);

impl ConflictMask {
    /// Every conflict type.
    pub const ALL: Self = Self(0x07);

    /// Mask of the given types.
    #[must_use]
    pub fn of(types: &[ConflictType]) -> Self {
        Self(types.iter().fold(0, |bits, t| bits | t.bit()))
    }

    /// True when `conflict_type` is included.
    #[must_use]
    pub const fn contains(self, conflict_type: ConflictType) -> bool {
        self.0 & conflict_type.bit() != 0
    }

    /// True when nothing is included.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// One conflict: the key and both sides. `None` means the side is a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictData {
    /// Conflict kind.
    pub conflict_type: ConflictType,
    /// Affected key.
    pub key: Vec<u8>,
    /// Value before the remote write.
    pub old_value: Option<Vec<u8>>,
    /// Value the remote write carries.
    pub new_value: Option<Vec<u8>>,
}

/// Receives conflicts, on the thread that reported them.
pub trait ConflictNotifier: Send + Sync {
    /// Handles one conflict.
    fn on_conflict(&self, conflict: &ConflictData);
}

impl<F> ConflictNotifier for F
where
    F: Fn(&ConflictData) + Send + Sync,
{
    fn on_conflict(&self, conflict: &ConflictData) {
        self(conflict);
    }
}

/// Native-partition access for a synchronizer, bound to one handle.
///
/// Obtained from [`Delegate::sync_access`](crate::Delegate::sync_access); a
/// local-only store has no synchronizable data and refuses it. Like a
/// result set, it does not keep the store open after its handle closes.
pub struct SyncAccess {
    store: Weak<Store>,
    store_id: String,
    handle: HandleId,
}

impl SyncAccess {
    pub(crate) fn new(store: &Arc<Store>, handle: HandleId) -> CoreResult<Self> {
        if store.kind() != StoreKind::MultiVersion {
            return Err(CoreError::not_supported("sync access on a local-only store"));
        }
        Ok(Self {
            store: Arc::downgrade(store),
            store_id: store.identity().store_id.clone(),
            handle,
        })
    }

    fn store(&self) -> CoreResult<Arc<Store>> {
        self.store.upgrade().ok_or(CoreError::HandleClosed)
    }

    /// Reads a native entry.
    pub fn get(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        self.store()?.get(self.handle, Partition::Native, key)
    }

    /// Applies a remote write. Replacing a different local value reports a
    /// [`ConflictType::NativeAll`] conflict after the write lands.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        let old = self.current(key)?;
        let (k, v) = (key.to_vec(), value.to_vec());
        self.store()?
            .mutate(self.handle, |txn| txn.put(Partition::Native, k, v))?;
        if let Some(old) = old.filter(|old| old.as_slice() != value) {
            self.report_conflict(&ConflictData {
                conflict_type: ConflictType::NativeAll,
                key: key.to_vec(),
                old_value: Some(old),
                new_value: Some(value.to_vec()),
            });
        }
        Ok(())
    }

    /// Applies a remote delete. Removing a live local value reports a
    /// [`ConflictType::NativeAll`] conflict after the delete lands.
    pub fn delete(&self, key: &[u8]) -> CoreResult<()> {
        let old = self.current(key)?;
        let k = key.to_vec();
        self.store()?
            .mutate(self.handle, |txn| txn.delete(Partition::Native, k))?;
        if let Some(old) = old {
            self.report_conflict(&ConflictData {
                conflict_type: ConflictType::NativeAll,
                key: key.to_vec(),
                old_value: Some(old),
                new_value: None,
            });
        }
        Ok(())
    }

    /// Delivers a conflict the synchronizer detected itself. Returns how many
    /// notifiers received it.
    pub fn report_conflict(&self, conflict: &ConflictData) -> usize {
        match self.store.upgrade() {
            Some(store) => store.report_conflict(conflict),
            None => 0,
        }
    }

    fn current(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(CoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for SyncAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAccess")
            .field("store", &self.store_id)
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_membership() {
        let mask = ConflictMask::of(&[ConflictType::ForeignKeyOnly, ConflictType::NativeAll]);
        assert!(mask.contains(ConflictType::NativeAll));
        assert!(!mask.contains(ConflictType::ForeignKeyOrigin));
        assert!(ConflictMask::default().is_empty());
        assert!(ConflictMask::ALL.contains(ConflictType::ForeignKeyOrigin));
    }
}
