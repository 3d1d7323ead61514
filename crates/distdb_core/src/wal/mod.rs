//! Write-ahead log.
//!
//! Every commit is written here as `Begin, (Put|Delete)*, Commit` and flushed
//! before any segment record is appended, so a crash between the two is
//! repaired by replaying committed transactions at open.
//!
//! ```text
//! | magic "DWAL" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Recovery tolerates a torn tail (truncated header or payload, or a checksum
//! mismatch on the very last record). A bad record followed by more data is
//! corruption.

mod record;
mod writer;

pub use record::{WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
pub use writer::{CommittedTransaction, WalManager, WalOp};
