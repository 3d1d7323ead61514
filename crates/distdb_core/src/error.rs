//! Error types for the storage core.
//!
//! Every failure is a [`CoreError`]. Callers that speak in status codes use
//! [`CoreError::status`], which folds the variants onto [`DbStatus`].

use crate::types::DbStatus;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the storage core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] distdb_storage::StorageError),

    /// I/O failure outside a backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested key, store or subscription does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// A caller argument was malformed.
    #[error("invalid argument: {message}")]
    InvalidArgs {
        /// Description of the bad argument.
        message: String,
    },

    /// A backup file is missing, malformed, or does not match the password or
    /// store kind.
    #[error("invalid backup file: {message}")]
    InvalidFile {
        /// Why the file was rejected.
        message: String,
    },

    /// The export destination already exists.
    #[error("file already exists: {}", path.display())]
    FileAlreadyExisted {
        /// The existing path.
        path: PathBuf,
    },

    /// Another operation holds the store's exclusivity.
    #[error("store busy: {reason}")]
    Busy {
        /// What holds the store.
        reason: String,
    },

    /// A count limit would be exceeded.
    #[error("limit exceeded: {message}")]
    OverMaxLimits {
        /// Which limit and by how much.
        message: String,
    },

    /// The operation is not available for this store configuration.
    #[error("not supported: {operation}")]
    NotSupported {
        /// The rejected operation.
        operation: String,
    },

    /// The password does not unlock the store.
    #[error("invalid password for encrypted store")]
    InvalidPassword,

    /// Durable data failed an integrity check.
    #[error("store corrupted: {message}")]
    Corrupted {
        /// What failed the check.
        message: String,
    },

    /// The call violates the handle protocol, e.g. committing without a
    /// transaction.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the misuse.
        message: String,
    },

    /// Encryption itself failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Cipher error description.
        message: String,
    },

    /// The handle was already closed.
    #[error("delegate handle is closed")]
    HandleClosed,
}

impl CoreError {
    /// Creates a [`CoreError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a [`CoreError::InvalidArgs`].
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            message: message.into(),
        }
    }

    /// Creates a [`CoreError::InvalidFile`].
    pub fn invalid_file(message: impl Into<String>) -> Self {
        Self::InvalidFile {
            message: message.into(),
        }
    }

    /// Creates a [`CoreError::Busy`].
    pub fn busy(reason: impl Into<String>) -> Self {
        Self::Busy {
            reason: reason.into(),
        }
    }

    /// Creates a [`CoreError::OverMaxLimits`].
    pub fn over_max_limits(message: impl Into<String>) -> Self {
        Self::OverMaxLimits {
            message: message.into(),
        }
    }

    /// Creates a [`CoreError::NotSupported`].
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Creates a [`CoreError::Corrupted`].
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a [`CoreError::InvalidOperation`].
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a [`CoreError::EncryptionFailed`].
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Folds this error onto the caller-facing status taxonomy.
    #[must_use]
    pub fn status(&self) -> DbStatus {
        match self {
            Self::NotFound { .. } => DbStatus::NotFound,
            Self::InvalidArgs { .. } => DbStatus::InvalidArgs,
            Self::InvalidFile { .. } => DbStatus::InvalidFile,
            Self::FileAlreadyExisted { .. } => DbStatus::FileAlreadyExisted,
            Self::Busy { .. } => DbStatus::Busy,
            Self::OverMaxLimits { .. } => DbStatus::OverMaxLimits,
            Self::NotSupported { .. } => DbStatus::NotSupport,
            Self::InvalidPassword | Self::Corrupted { .. } => {
                DbStatus::InvalidPasswordOrCorrupted
            }
            Self::Storage(_)
            | Self::Io(_)
            | Self::InvalidOperation { .. }
            | Self::EncryptionFailed { .. }
            | Self::HandleClosed => DbStatus::DbError,
        }
    }

    /// True for integrity failures that should reach the corruption handler.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}

/// Returns the status code for any core result, `Ok` included.
pub fn status<T>(result: &CoreResult<T>) -> DbStatus {
    match result {
        Ok(_) => DbStatus::Ok,
        Err(e) => e.status(),
    }
}
