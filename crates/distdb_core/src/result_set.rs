//! Forward-only iteration over a prefix of one partition.

use crate::error::{CoreError, CoreResult};
use crate::segment::RecordPointer;
use crate::store::Store;
use crate::types::{Entry, HandleId, Partition};
use std::sync::{Arc, Weak};

/// Entries under a prefix, as committed when the set was opened.
///
/// Keys and record locations are captured at open; values are read one at a
/// time as the set is iterated. Records are never rewritten in place and
/// nothing that could move them (import, rekey, compaction) runs while a set
/// is open, so a set keeps showing the snapshot it was opened on.
///
/// A set counts against its handle's limit until it is closed or dropped,
/// and holds off any rewrite of the store's files meanwhile. It does not keep
/// the store open: once its handle is closed, iteration yields `HandleClosed`.
pub struct ResultSet {
    store: Weak<Store>,
    handle: HandleId,
    partition: Partition,
    items: Vec<(Vec<u8>, RecordPointer)>,
    position: usize,
    released: bool,
}

impl ResultSet {
    pub(crate) fn new(
        store: &Arc<Store>,
        handle: HandleId,
        partition: Partition,
        items: Vec<(Vec<u8>, RecordPointer)>,
    ) -> Self {
        Self {
            store: Arc::downgrade(store),
            handle,
            partition,
            items,
            position: 0,
            released: false,
        }
    }

    /// Partition the set iterates.
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Total entries in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Never true for a set returned by a successful open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries already returned.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Releases the set.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            if let Some(store) = self.store.upgrade() {
                store.release_result_set(self.handle);
            }
        }
    }
}

impl Iterator for ResultSet {
    type Item = CoreResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, pointer) = self.items.get(self.position)?;
        self.position += 1;
        let value = match self.store.upgrade() {
            Some(store) => store.read_pointer(self.handle, *pointer),
            None => Err(CoreError::HandleClosed),
        };
        Some(value.map(|value| Entry {
            key: key.clone(),
            value,
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.items.len() - self.position;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ResultSet {}

impl Drop for ResultSet {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("partition", &self.partition)
            .field("len", &self.items.len())
            .field("position", &self.position)
            .finish()
    }
}
