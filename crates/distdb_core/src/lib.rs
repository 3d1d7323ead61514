//! # DistDB Core
//!
//! Embedded, transactional key-value storage for distributed applications.
//!
//! A [`Manager`] opens stores by identifier and hands out [`Delegate`]
//! handles. Every store holds two partitions: [`Partition::Native`], whose
//! entries a replication layer may synchronize through [`SyncAccess`], and
//! [`Partition::LocalOnly`], which never leaves the device.
//!
//! This crate provides:
//! - Atomic single writes, batches and explicit transactions of up to 128
//!   operations, with read-your-own-writes inside a transaction
//! - A write-ahead log and checksummed segment file per store, with optional
//!   AES-256-GCM encryption under a password
//! - Observers notified once per commit with coalesced insert, update and
//!   delete lists
//! - Export to and import from password-protected backup files, and in-place
//!   re-encryption
//! - Corruption detection reported to an application handler
//!
//! ## Example
//!
//! ```rust,ignore
//! use distdb_core::{Manager, ManagerConfig, Partition, StoreConfig};
//!
//! let manager = Manager::new(ManagerConfig::new("/var/lib/app", "app", "user"))?;
//! let store = manager.open("contacts", StoreConfig::new())?;
//!
//! store.put(Partition::Native, b"alice", b"+1 555 0100")?;
//! assert_eq!(store.get(Partition::Native, b"alice")?, b"+1 555 0100");
//!
//! store.close()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backup;
mod communicator;
mod config;
mod corruption;
pub mod crypto;
mod delegate;
pub mod dir;
pub mod engine;
mod error;
mod format;
mod manager;
pub mod manifest;
mod observer;
mod result_set;
pub mod segment;
mod store;
mod sync_access;
pub mod transaction;
mod types;
pub mod wal;

pub use backup::BackupMetadata;
pub use communicator::{
    DeviceChange, DeviceChangeCallback, DeviceId, ProcessCommunicator, ReceiveCallback,
};
pub use config::{ManagerConfig, StoreConfig};
pub use corruption::{CorruptionHandler, CorruptionInfo};
pub use crypto::CipherPassword;
pub use delegate::Delegate;
pub use error::{status, CoreError, CoreResult};
pub use manager::Manager;
pub use observer::{
    Change, ChangeSet, ChangeType, ChangedData, KeyFilter, NotificationHub, Observer,
    ObserverMode,
};
pub use result_set::ResultSet;
pub use sync_access::{ConflictData, ConflictMask, ConflictNotifier, ConflictType, SyncAccess};
pub use types::{
    DbStatus, Entry, HandleId, Partition, SequenceNumber, StoreKind, TransactionId,
    MAX_BATCH_SIZE, MAX_ID_LENGTH, MAX_KEY_SIZE, MAX_PASSWORD_SIZE,
    MAX_RESULT_SETS_PER_HANDLE, MAX_VALUE_SIZE,
};
