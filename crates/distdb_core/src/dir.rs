//! On-disk layout of one persistent store.
//!
//! ```text
//! <store_dir>/
//! ├─ LOCK           # advisory lock held while the store is open
//! ├─ MANIFEST       # kind, encryption parameters, schema
//! ├─ wal.log        # write-ahead log
//! ├─ segments.dat   # committed records
//! ├─ segments.new   # staged replacement (import, rekey)
//! ├─ MANIFEST.new   # staged manifest (rekey)
//! └─ SWAP           # marker: staged files are complete and must win
//! ```
//!
//! A swap is decided the moment `SWAP` becomes durable. Before that, a crash
//! leaves staged files that are discarded at the next open; after it, the
//! next open finishes the renames.

use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use distdb_storage::atomic;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const LOCK_FILE: &str = "LOCK";
const MANIFEST_FILE: &str = "MANIFEST";
const WAL_FILE: &str = "wal.log";
const SEGMENT_FILE: &str = "segments.dat";
const SEGMENT_STAGED: &str = "segments.new";
const MANIFEST_STAGED: &str = "MANIFEST.new";
const SWAP_MARKER: &str = "SWAP";

/// What [`StoreDir::recover_swap`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapRecovery {
    /// No swap was in progress.
    Clean,
    /// A decided swap was completed.
    RolledForward,
    /// Undecided staged files were removed.
    Discarded,
}

/// A locked store directory.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock: File,
}

impl StoreDir {
    /// Opens (and with `create_if_missing`, creates) the directory and takes
    /// its lock. A lock held elsewhere is reported as `Busy`.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.join(MANIFEST_FILE).exists() && !create_if_missing {
            return Err(CoreError::not_found(format!("store at {}", path.display())));
        }
        fs::create_dir_all(path)?;
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(CoreError::busy(format!(
                "store directory {} is locked",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// WAL file path.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Segment file path.
    #[must_use]
    pub fn segment_path(&self) -> PathBuf {
        self.path.join(SEGMENT_FILE)
    }

    /// Path a replacement segment file is staged at.
    #[must_use]
    pub fn staged_segment_path(&self) -> PathBuf {
        self.path.join(SEGMENT_STAGED)
    }

    /// Loads the manifest, `None` for a fresh directory.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        match fs::read(self.path.join(MANIFEST_FILE)) {
            Ok(bytes) => Manifest::decode(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the manifest atomically.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        atomic::write_file_atomic(&self.path.join(MANIFEST_FILE), &manifest.encode())?;
        Ok(())
    }

    /// Decides a staged swap and applies it. The staged segment file must
    /// already be complete and synced; `manifest`, when given, replaces the
    /// current manifest as part of the same swap.
    pub fn commit_swap(&self, manifest: Option<&Manifest>) -> CoreResult<()> {
        self.decide_swap(manifest)?;
        self.roll_forward()
    }

    /// Makes the staged swap durable without applying it. Whatever happens
    /// next, the following [`recover_swap`](Self::recover_swap) completes it.
    pub fn decide_swap(&self, manifest: Option<&Manifest>) -> CoreResult<()> {
        if let Some(manifest) = manifest {
            atomic::write_file_synced(&self.path.join(MANIFEST_STAGED), &manifest.encode())?;
        }
        atomic::sync_dir(&self.path)?;
        atomic::write_file_synced(&self.path.join(SWAP_MARKER), b"swap")?;
        atomic::sync_dir(&self.path)?;
        Ok(())
    }

    /// Removes staged files of a swap that was never decided.
    pub fn discard_staged(&self) -> CoreResult<bool> {
        let a = atomic::remove_if_exists(&self.path.join(SEGMENT_STAGED))?;
        let b = atomic::remove_if_exists(&self.path.join(MANIFEST_STAGED))?;
        Ok(a || b)
    }

    /// Settles a swap interrupted by a crash. Must run before the WAL and
    /// segment files are opened.
    pub fn recover_swap(&self) -> CoreResult<SwapRecovery> {
        if self.path.join(SWAP_MARKER).exists() {
            warn!(dir = %self.path.display(), "finishing interrupted swap");
            self.roll_forward()?;
            return Ok(SwapRecovery::RolledForward);
        }
        if self.discard_staged()? {
            warn!(dir = %self.path.display(), "discarded undecided staged files");
            return Ok(SwapRecovery::Discarded);
        }
        Ok(SwapRecovery::Clean)
    }

    fn roll_forward(&self) -> CoreResult<()> {
        atomic::rename_if_exists(&self.path.join(SEGMENT_STAGED), &self.segment_path())?;
        atomic::rename_if_exists(
            &self.path.join(MANIFEST_STAGED),
            &self.path.join(MANIFEST_FILE),
        )?;
        // The staged segments already hold every committed entry.
        let wal = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.wal_path())?;
        wal.set_len(0)?;
        wal.sync_all()?;
        atomic::remove_if_exists(&self.path.join(SWAP_MARKER))?;
        atomic::sync_dir(&self.path)?;
        info!(dir = %self.path.display(), "swap applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherPassword;
    use crate::types::StoreKind;
    use tempfile::tempdir;

    fn manifest() -> Manifest {
        Manifest::create(StoreKind::MultiVersion, &CipherPassword::none(), None)
            .unwrap()
            .0
    }

    #[test]
    fn second_open_is_busy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        let _first = StoreDir::open(&path, true).unwrap();
        let err = StoreDir::open(&path, true).unwrap_err();
        assert!(matches!(err, CoreError::Busy { .. }));
    }

    #[test]
    fn missing_store_without_create() {
        let dir = tempdir().unwrap();
        let err = StoreDir::open(&dir.path().join("absent"), false).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn manifest_roundtrip() {
        let dir = tempdir().unwrap();
        let store = StoreDir::open(dir.path(), true).unwrap();
        assert!(store.load_manifest().unwrap().is_none());
        let m = manifest();
        store.save_manifest(&m).unwrap();
        assert_eq!(store.load_manifest().unwrap(), Some(m));
    }

    #[test]
    fn undecided_swap_is_discarded() {
        let dir = tempdir().unwrap();
        let store = StoreDir::open(dir.path(), true).unwrap();
        fs::write(store.segment_path(), b"old").unwrap();
        fs::write(store.staged_segment_path(), b"new").unwrap();
        assert_eq!(store.recover_swap().unwrap(), SwapRecovery::Discarded);
        assert_eq!(fs::read(store.segment_path()).unwrap(), b"old");
        assert!(!store.staged_segment_path().exists());
    }

    #[test]
    fn decided_swap_rolls_forward() {
        let dir = tempdir().unwrap();
        let store = StoreDir::open(dir.path(), true).unwrap();
        fs::write(store.segment_path(), b"old").unwrap();
        fs::write(store.wal_path(), b"pending").unwrap();
        fs::write(store.staged_segment_path(), b"new").unwrap();
        fs::write(dir.path().join(SWAP_MARKER), b"swap").unwrap();
        assert_eq!(store.recover_swap().unwrap(), SwapRecovery::RolledForward);
        assert_eq!(fs::read(store.segment_path()).unwrap(), b"new");
        assert_eq!(fs::read(store.wal_path()).unwrap().len(), 0);
        assert!(!dir.path().join(SWAP_MARKER).exists());
        assert_eq!(store.recover_swap().unwrap(), SwapRecovery::Clean);
    }

    #[test]
    fn commit_swap_replaces_manifest() {
        let dir = tempdir().unwrap();
        let store = StoreDir::open(dir.path(), true).unwrap();
        store.save_manifest(&manifest()).unwrap();
        fs::write(store.staged_segment_path(), b"new").unwrap();
        let mut next = manifest();
        next.schema = Some("v2".into());
        store.commit_swap(Some(&next)).unwrap();
        assert_eq!(store.load_manifest().unwrap(), Some(next));
        assert_eq!(fs::read(store.segment_path()).unwrap(), b"new");
    }
}
