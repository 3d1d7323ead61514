//! # DistDB Storage
//!
//! Byte-store backends for the DistDB engine.
//!
//! Backends hold opaque bytes. Record framing, checksums, encryption and
//! recovery all live in `distdb_core`; this crate only knows how to append,
//! read back, truncate and make bytes durable.
//!
//! - [`InMemoryBackend`] backs memory-only stores and tests
//! - [`FileBackend`] backs persistent stores
//! - [`atomic`] holds the file helpers used for manifests and staged swaps
//!
//! ```rust
//! use distdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"entry").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"entry");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod atomic;
mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
