//! Manager and store configuration.

use crate::crypto::CipherPassword;
use crate::error::{CoreError, CoreResult};
use crate::types::{validate_identifier, StoreKind};
use std::path::{Path, PathBuf};

/// Where stores live and who owns them.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root directory for persistent stores. Must exist.
    pub data_dir: PathBuf,
    /// Owning application.
    pub app_id: String,
    /// Owning user.
    pub user_id: String,
}

impl ManagerConfig {
    /// Creates a manager configuration.
    pub fn new(
        data_dir: impl AsRef<Path>,
        app_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            app_id: app_id.into(),
            user_id: user_id.into(),
        }
    }

    pub(crate) fn validate(&self) -> CoreResult<()> {
        validate_identifier("app", &self.app_id)?;
        validate_identifier("user", &self.user_id)
    }
}

/// Per-open store options.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Keep the store in memory only; it is discarded at last close.
    pub is_memory_db: bool,
    /// Encrypt records with a key derived from `cipher_password`.
    pub is_encrypted: bool,
    /// Store password; must be non-empty exactly when `is_encrypted`.
    pub cipher_password: CipherPassword,
    /// Open a local-only (single-version) store instead of a native one.
    pub local_only: bool,
    /// Opaque schema text recorded when the store is created.
    pub schema: Option<String>,
    /// Create the store when it does not exist yet.
    pub create_if_missing: bool,
    /// Fsync the WAL on every commit.
    pub sync_on_commit: bool,
    /// WAL size that triggers a checkpoint.
    pub checkpoint_threshold: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            is_memory_db: false,
            is_encrypted: false,
            cipher_password: CipherPassword::none(),
            local_only: false,
            schema: None,
            create_if_missing: true,
            sync_on_commit: true,
            checkpoint_threshold: 1024 * 1024, // 1 MiB
        }
    }
}

impl StoreConfig {
    /// Default configuration: persistent, unencrypted, native.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets memory-only mode.
    #[must_use]
    pub const fn memory(mut self, value: bool) -> Self {
        self.is_memory_db = value;
        self
    }

    /// Enables encryption with `password`.
    #[must_use]
    pub fn encrypted(mut self, password: CipherPassword) -> Self {
        self.is_encrypted = true;
        self.cipher_password = password;
        self
    }

    /// Selects a local-only store.
    #[must_use]
    pub const fn local_only(mut self, value: bool) -> Self {
        self.local_only = value;
        self
    }

    /// Records opaque schema text.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Sets whether a missing store is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether commits fsync the WAL.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the WAL checkpoint threshold in bytes.
    #[must_use]
    pub const fn checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_threshold = bytes;
        self
    }

    /// Kind of store this configuration opens.
    #[must_use]
    pub const fn kind(&self) -> StoreKind {
        StoreKind::from_local_only(self.local_only)
    }

    pub(crate) fn validate(&self) -> CoreResult<()> {
        if self.is_memory_db && self.is_encrypted {
            return Err(CoreError::not_supported("encryption of a memory store"));
        }
        if self.is_encrypted && self.cipher_password.is_empty() {
            return Err(CoreError::invalid_args("encrypted store needs a password"));
        }
        if !self.is_encrypted && !self.cipher_password.is_empty() {
            return Err(CoreError::invalid_args(
                "password given for an unencrypted store",
            ));
        }
        Ok(())
    }
}
