//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small alphabet so that generated operations collide
//! often enough to exercise overwrites and deletes of existing keys.

use distdb_core::{Entry, Partition, MAX_KEY_SIZE};
use proptest::prelude::*;

/// One mutation a generated workload applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Single put.
    Put(Partition, Vec<u8>, Vec<u8>),
    /// Single delete.
    Delete(Partition, Vec<u8>),
    /// Batch put.
    PutBatch(Partition, Vec<Entry>),
    /// Batch delete.
    DeleteBatch(Partition, Vec<Vec<u8>>),
}

impl Op {
    /// Budget units the operation consumes.
    pub fn cost(&self) -> usize {
        match self {
            Self::Put(..) | Self::Delete(..) => 1,
            Self::PutBatch(_, entries) => entries.len(),
            Self::DeleteBatch(_, keys) => keys.len(),
        }
    }
}

/// Strategy for either partition.
pub fn partition_strategy() -> impl Strategy<Value = Partition> {
    prop_oneof![Just(Partition::Native), Just(Partition::LocalOnly)]
}

/// Strategy for valid keys from a small, colliding key space.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::string::string_regex("k[0-9a-f]{1,2}")
        .expect("Invalid regex")
        .prop_map(String::into_bytes)
}

/// Strategy for keys no store accepts: empty or oversized.
pub fn invalid_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(Vec::new()),
        Just(vec![b'x'; MAX_KEY_SIZE + 1]),
    ]
}

/// Strategy for values, empty included.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for valid entries.
pub fn entry_strategy() -> impl Strategy<Value = Entry> {
    (key_strategy(), value_strategy()).prop_map(|(key, value)| Entry { key, value })
}

/// Strategy for valid non-empty batches of up to `max` entries.
pub fn batch_strategy(max: usize) -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::vec(entry_strategy(), 1..=max.max(1))
}

/// Strategy for batches holding at least one invalid entry.
pub fn invalid_batch_strategy() -> impl Strategy<Value = Vec<Entry>> {
    (
        prop::collection::vec(entry_strategy(), 0..8),
        invalid_key_strategy(),
        value_strategy(),
        any::<prop::sample::Index>(),
    )
        .prop_map(|(mut entries, key, value, at)| {
            let position = at.index(entries.len() + 1);
            entries.insert(position, Entry { key, value });
            entries
        })
}

/// Strategy for a single mutation.
pub fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (partition_strategy(), key_strategy(), value_strategy())
            .prop_map(|(p, k, v)| Op::Put(p, k, v)),
        2 => (partition_strategy(), key_strategy()).prop_map(|(p, k)| Op::Delete(p, k)),
        1 => (partition_strategy(), batch_strategy(6)).prop_map(|(p, e)| Op::PutBatch(p, e)),
        1 => (partition_strategy(), prop::collection::vec(key_strategy(), 1..6))
            .prop_map(|(p, k)| Op::DeleteBatch(p, k)),
    ]
}

/// Strategy for a workload that fits in one transaction.
pub fn ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 0..max_ops).prop_map(|ops| {
        let mut budget = distdb_core::MAX_BATCH_SIZE;
        ops.into_iter()
            .take_while(|op| {
                let fits = op.cost() <= budget;
                budget = budget.saturating_sub(op.cost());
                fits
            })
            .collect()
    })
}
