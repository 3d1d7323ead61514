//! Transaction manager.

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::observer::{Change, ChangeSet, ChangeType};
use crate::transaction::state::Transaction;
use crate::types::Entry;
use crate::wal::WalOp;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Serializes commits against one engine.
///
/// The engine write lock is the linearization point: a commit classifies its
/// writes against the committed state and applies them without releasing
/// it, so no other commit can interleave.
pub struct TransactionManager {
    engine: RwLock<Engine>,
}

impl TransactionManager {
    /// Wraps an opened engine.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: RwLock::new(engine),
        }
    }

    /// Shared access to the committed state.
    pub fn read(&self) -> RwLockReadGuard<'_, Engine> {
        self.engine.read()
    }

    /// Exclusive access, used by checkpoints and swaps.
    pub fn write(&self) -> RwLockWriteGuard<'_, Engine> {
        self.engine.write()
    }

    /// Commits a transaction and returns the net changes it made.
    ///
    /// The transaction ends either way: committed on success, rolled back
    /// when the commit fails.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<ChangeSet> {
        if !txn.is_active() {
            return Err(CoreError::invalid_operation("transaction not active"));
        }
        let ops = txn.take_ops();
        match self.apply(ops) {
            Ok(changes) => {
                txn.mark_committed();
                Ok(changes)
            }
            Err(e) => {
                txn.mark_rolled_back();
                Err(e)
            }
        }
    }

    /// Applies `ops` as one commit. Each key must appear at most once.
    pub fn apply(&self, ops: Vec<WalOp>) -> CoreResult<ChangeSet> {
        let mut engine = self.engine.write();
        let mut changes = Vec::with_capacity(ops.len());
        let mut effective = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                WalOp::Put {
                    partition,
                    key,
                    value,
                } => {
                    let change_type = if engine.contains(partition, &key) {
                        ChangeType::Update
                    } else {
                        ChangeType::Insert
                    };
                    changes.push(Change {
                        partition,
                        change_type,
                        entry: Entry::new(key.clone(), value.clone()),
                    });
                    effective.push(WalOp::Put {
                        partition,
                        key,
                        value,
                    });
                }
                WalOp::Delete { partition, key } => {
                    // Deleting an absent key is a no-op and is neither logged
                    // nor reported.
                    if let Some(old) = engine.get(partition, &key)? {
                        changes.push(Change {
                            partition,
                            change_type: ChangeType::Delete,
                            entry: Entry::new(key.clone(), old),
                        });
                        effective.push(WalOp::Delete { partition, key });
                    }
                }
            }
        }
        let sequence = engine.commit(effective)?;
        Ok(ChangeSet { sequence, changes })
    }

    /// Forces a checkpoint.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.engine.write().checkpoint()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let engine = self.engine.read();
        f.debug_struct("TransactionManager")
            .field("sequence", &engine.sequence())
            .field("live", &engine.live_count())
            .finish()
    }
}
