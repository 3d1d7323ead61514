//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::types::{validate_key, validate_prefix, validate_value, Entry, Partition, MAX_BATCH_SIZE};
use crate::wal::WalOp;
use std::collections::BTreeMap;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting writes.
    Active,
    /// Applied to the store.
    Committed,
    /// Discarded.
    RolledBack,
}

/// Buffered mutation of one key. Later writes to a key replace earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    /// Store a value.
    Put(Vec<u8>),
    /// Remove the key.
    Delete,
}

/// Writes buffered by one handle between `start` and `commit`.
///
/// Every accepted call charges its length against the budget of
/// [`MAX_BATCH_SIZE`] operations. A call that would exceed it, or that
/// carries an invalid key or value, is rejected whole and leaves the buffer
/// untouched.
#[derive(Debug)]
pub struct Transaction {
    state: TransactionState,
    writes: BTreeMap<(Partition, Vec<u8>), PendingWrite>,
    op_count: usize,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// Creates an active, empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: TransactionState::Active,
            writes: BTreeMap::new(),
            op_count: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// True while writes are accepted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Operations charged so far.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.op_count
    }

    /// Operations still available.
    #[must_use]
    pub fn remaining_budget(&self) -> usize {
        MAX_BATCH_SIZE - self.op_count
    }

    /// Number of distinct keys touched.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Buffers one put.
    pub fn put(&mut self, partition: Partition, key: Vec<u8>, value: Vec<u8>) -> CoreResult<()> {
        self.put_batch(partition, vec![Entry { key, value }])
    }

    /// Buffers one delete.
    pub fn delete(&mut self, partition: Partition, key: Vec<u8>) -> CoreResult<()> {
        self.delete_batch(partition, vec![key])
    }

    /// Buffers puts for every entry, or none of them.
    pub fn put_batch(&mut self, partition: Partition, entries: Vec<Entry>) -> CoreResult<()> {
        self.ensure_active()?;
        ensure_non_empty(entries.len())?;
        for entry in &entries {
            validate_key(&entry.key)?;
            validate_value(&entry.value)?;
        }
        self.charge(entries.len())?;
        for entry in entries {
            self.writes
                .insert((partition, entry.key), PendingWrite::Put(entry.value));
        }
        Ok(())
    }

    /// Buffers deletes for every key, or none of them. Absent keys are fine.
    pub fn delete_batch(&mut self, partition: Partition, keys: Vec<Vec<u8>>) -> CoreResult<()> {
        self.ensure_active()?;
        ensure_non_empty(keys.len())?;
        for key in &keys {
            validate_key(key)?;
        }
        self.charge(keys.len())?;
        for key in keys {
            self.writes.insert((partition, key), PendingWrite::Delete);
        }
        Ok(())
    }

    /// Buffered write for a key, if any.
    #[must_use]
    pub fn pending(&self, partition: Partition, key: &[u8]) -> Option<&PendingWrite> {
        self.writes.get(&(partition, key.to_vec()))
    }

    /// Merges buffered writes under `prefix` into committed entries, keeping
    /// key order.
    pub fn overlay(
        &self,
        partition: Partition,
        prefix: &[u8],
        committed: Vec<Entry>,
    ) -> CoreResult<Vec<Entry>> {
        validate_prefix(prefix)?;
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = committed
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect();
        let start = (partition, prefix.to_vec());
        for ((p, key), write) in self.writes.range(start..) {
            if *p != partition || !key.starts_with(prefix) {
                break;
            }
            match write {
                PendingWrite::Put(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                PendingWrite::Delete => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged
            .into_iter()
            .map(|(key, value)| Entry { key, value })
            .collect())
    }

    /// Consumes the buffer into WAL operations in key order.
    pub(crate) fn take_ops(&mut self) -> Vec<WalOp> {
        std::mem::take(&mut self.writes)
            .into_iter()
            .map(|((partition, key), write)| match write {
                PendingWrite::Put(value) => WalOp::Put {
                    partition,
                    key,
                    value,
                },
                PendingWrite::Delete => WalOp::Delete { partition, key },
            })
            .collect()
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.writes.clear();
        self.state = TransactionState::RolledBack;
    }

    fn charge(&mut self, ops: usize) -> CoreResult<()> {
        if self.op_count + ops > MAX_BATCH_SIZE {
            return Err(CoreError::over_max_limits(format!(
                "{ops} operations requested, {} of {MAX_BATCH_SIZE} remaining",
                self.remaining_budget()
            )));
        }
        self.op_count += ops;
        Ok(())
    }

    fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => {
                Err(CoreError::invalid_operation("transaction already committed"))
            }
            TransactionState::RolledBack => {
                Err(CoreError::invalid_operation("transaction already rolled back"))
            }
        }
    }
}

fn ensure_non_empty(len: usize) -> CoreResult<()> {
    if len == 0 {
        return Err(CoreError::invalid_args("batch is empty"));
    }
    Ok(())
}
