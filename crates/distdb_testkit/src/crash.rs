//! Crash and damage simulation.
//!
//! Two kinds of failure are simulated:
//!
//! 1. **Torn writes** - [`CrashableBackend`] wraps a storage backend and
//!    stops accepting bytes after a threshold, the way a process killed in
//!    the middle of a write would leave a file.
//! 2. **Interrupted swaps and damaged files** - the free functions below
//!    manipulate the files of a closed store directly, so the next open has
//!    to recover from them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use distdb_testkit::crash::{stage_swap, SwapStage};
//!
//! env.manager.close(&store)?;
//! stage_swap(&path, &CipherPassword::none(), &entries, SwapStage::Decided)?;
//! let store = env.open_native("s"); // sees `entries`
//! ```

use distdb_core::dir::StoreDir;
use distdb_core::engine::write_segment_file;
use distdb_core::{CipherPassword, CoreError, CoreResult, Entry, Partition, SequenceNumber};
use distdb_storage::{FileBackend, StorageBackend, StorageError, StorageResult};
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared trigger of a [`CrashableBackend`].
///
/// The backend is moved into the engine it is tested under, so the test keeps
/// this handle to arm it.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    crash_after_bytes: Arc<AtomicUsize>,
    bytes_written: Arc<AtomicUsize>,
    crashed: Arc<AtomicBool>,
}

impl CrashSwitch {
    /// Lets `bytes` more bytes through, then fails every write.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Disarms the switch.
    pub fn reset(&self) {
        self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Whether a write has been cut short.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }
}

/// A storage backend that can simulate a crash mid-write.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: CrashSwitch,
}

impl CrashableBackend {
    /// Wraps `inner`. The returned switch starts disarmed.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, CrashSwitch) {
        let switch = CrashSwitch {
            crash_after_bytes: Arc::new(AtomicUsize::new(usize::MAX)),
            bytes_written: Arc::new(AtomicUsize::new(0)),
            crashed: Arc::new(AtomicBool::new(false)),
        };
        (
            Self {
                inner,
                switch: switch.clone(),
            },
            switch,
        )
    }

    fn crash(&self, what: &str) -> StorageError {
        self.switch.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(io::ErrorKind::Other, format!("simulated crash {what}")))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.switch.has_crashed() {
            return Err(self.crash("after crash"));
        }
        let current = self
            .switch
            .bytes_written
            .fetch_add(data.len(), Ordering::SeqCst);
        let threshold = self.switch.crash_after_bytes.load(Ordering::SeqCst);
        if current >= threshold {
            return Err(self.crash("before write"));
        }
        if current + data.len() > threshold {
            // Part of the write reaches the file.
            let _ = self.inner.append(&data[..threshold - current]);
            return Err(self.crash("during write"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.has_crashed() {
            return Err(self.crash("during sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// How far a simulated swap got before the crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStage {
    /// Staged files written, swap not decided: the next open discards them.
    Staged,
    /// Swap marker durable: the next open completes the swap.
    Decided,
}

/// Leaves a replacement of a closed store's content half done, as a crash
/// during import would. `password` must unlock the store.
pub fn stage_swap(
    store_path: &Path,
    password: &CipherPassword,
    entries: &[(Partition, Entry)],
    stage: SwapStage,
) -> CoreResult<()> {
    let dir = StoreDir::open(store_path, false)?;
    let manifest = dir
        .load_manifest()?
        .ok_or_else(|| CoreError::not_found("manifest"))?;
    let cipher = manifest.unlock(password)?.map(Arc::new);
    let staged = FileBackend::open(&dir.staged_segment_path())?;
    write_segment_file(Box::new(staged), cipher, entries, SequenceNumber::new(1))?;
    if stage == SwapStage::Decided {
        dir.decide_swap(None)?;
    }
    Ok(())
}

/// Flips one byte inside the first record of a closed or open store's
/// segment file. With more than one record present the damage is not at the
/// tail, so it reads as corruption rather than a torn write.
pub fn damage_first_record(store_path: &Path) -> io::Result<()> {
    // Inside the sequence number field, covered by the record checksum.
    flip_byte(&store_path.join("segments.dat"), 6)
}

/// Flips every bit of the byte at `offset`.
pub fn flip_byte(path: &Path, offset: u64) -> io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut byte)?;
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&byte)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use distdb_storage::InMemoryBackend;

    #[test]
    fn crash_cuts_write_short() {
        let (mut backend, switch) = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        backend.append(b"hello").unwrap();
        switch.crash_after(3);
        assert!(backend.append(b"world").is_err());
        assert!(switch.has_crashed());
        assert_eq!(backend.read_all().unwrap(), b"hellowor");
        assert!(backend.append(b"!").is_err());
        switch.reset();
        backend.append(b"!").unwrap();
    }

    #[test]
    fn flip_byte_changes_one_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        flip_byte(&path, 1).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1u8, 0xFD, 3]);
    }
}
