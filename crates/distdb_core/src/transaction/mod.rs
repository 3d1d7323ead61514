//! Explicit transactions and the commit path.
//!
//! A [`Transaction`] buffers writes for one handle and enforces the
//! operation budget. The [`TransactionManager`] owns the engine and turns a
//! buffered write set into one durable commit plus the net [`ChangeSet`]
//! observers receive.
//!
//! [`ChangeSet`]: crate::observer::ChangeSet

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{PendingWrite, Transaction, TransactionState};
