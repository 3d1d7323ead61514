//! Append-only segment file holding the committed entries of both partitions.
//!
//! ```text
//! | len (4) | flags (1) | sequence (8) | body (N) | crc32 (4) |
//! ```
//!
//! `len` covers the whole record. The body is the encoded entry, sealed with
//! the store key when the ENCRYPTED flag is set. Newer records shadow older
//! ones; a TOMBSTONE record hides the key.

mod record;
mod store;

pub use record::{SegmentRecord, FLAG_ENCRYPTED, FLAG_TOMBSTONE};
pub use store::{RecordPointer, SegmentStore};
