//! The byte-store contract shared by all backends.

use crate::error::StorageResult;

/// An append-only byte store with positional reads.
///
/// Offsets returned by [`append`](StorageBackend::append) stay valid until the
/// store is truncated below them. Implementations must be `Send + Sync`; the
/// engine wraps them in its own locks and never relies on interior ordering
/// between concurrent appends.
pub trait StorageBackend: Send + Sync {
    /// Reads exactly `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the OS.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the number of stored bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Shrinks the store to `new_size` bytes.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole store.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }

    /// Drops every stored byte.
    fn clear(&mut self) -> StorageResult<()> {
        self.truncate(0)
    }
}
