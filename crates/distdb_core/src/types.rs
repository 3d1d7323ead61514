//! Core value types, limits and argument validation.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use uuid::Uuid;

/// Longest accepted key, in bytes.
pub const MAX_KEY_SIZE: usize = 1024;
/// Longest accepted value, in bytes.
pub const MAX_VALUE_SIZE: usize = 4 * 1024 * 1024;
/// Operation budget of one transaction or one batch call.
pub const MAX_BATCH_SIZE: usize = 128;
/// Longest accepted cipher password, in bytes.
pub const MAX_PASSWORD_SIZE: usize = 128;
/// Result sets a single handle may hold open at once.
pub const MAX_RESULT_SETS_PER_HANDLE: usize = 4;
/// Longest accepted app, user or store identifier.
pub const MAX_ID_LENGTH: usize = 128;

/// Caller-facing status taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbStatus {
    /// Success.
    Ok,
    /// Missing key, store or subscription.
    NotFound,
    /// Malformed argument.
    InvalidArgs,
    /// Rejected backup file.
    InvalidFile,
    /// Export destination already exists.
    FileAlreadyExisted,
    /// Exclusivity held elsewhere.
    Busy,
    /// A count limit would be exceeded.
    OverMaxLimits,
    /// Not available for this store.
    NotSupport,
    /// Generic or protocol failure.
    DbError,
    /// Wrong password or failed integrity check.
    InvalidPasswordOrCorrupted,
}

/// One of the two key namespaces inside a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Partition {
    /// Synchronizable entries.
    Native,
    /// Entries that never leave the device.
    LocalOnly,
}

impl Partition {
    /// On-disk tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Native => 0,
            Self::LocalOnly => 1,
        }
    }

    /// Parses an on-disk tag.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Native),
            1 => Some(Self::LocalOnly),
            _ => None,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::LocalOnly => f.write_str("local"),
        }
    }
}

/// Store flavor chosen at open time.
///
/// A backup carries its kind and only imports into a store of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Native store whose entries may be synchronized.
    MultiVersion,
    /// Local-only store.
    SingleVersion,
}

impl StoreKind {
    /// Kind selected by the `local_only` open flag.
    #[must_use]
    pub const fn from_local_only(local_only: bool) -> Self {
        if local_only {
            Self::SingleVersion
        } else {
            Self::MultiVersion
        }
    }

    /// On-disk tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::MultiVersion => 1,
            Self::SingleVersion => 2,
        }
    }

    /// Parses an on-disk tag.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::MultiVersion),
            2 => Some(Self::SingleVersion),
            _ => None,
        }
    }

    /// Subdirectory holding stores of this kind.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::MultiVersion => "multi_ver",
            Self::SingleVersion => "single_ver",
        }
    }
}

/// A key with its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// Key bytes.
    pub key: Vec<u8>,
    /// Value bytes.
    pub value: Vec<u8>,
}

impl Entry {
    /// Creates an entry.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Monotonic commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The following sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Identifier of one commit in the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a transaction id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identity of one delegate handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(Uuid);

impl HandleId {
    /// Allocates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{}", self.0.simple())
    }
}

/// Rejects empty and oversized keys.
pub(crate) fn validate_key(key: &[u8]) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_args("key is empty"));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(CoreError::invalid_args(format!(
            "key is {} bytes, limit is {MAX_KEY_SIZE}",
            key.len()
        )));
    }
    Ok(())
}

/// Rejects oversized values.
pub(crate) fn validate_value(value: &[u8]) -> CoreResult<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(CoreError::invalid_args(format!(
            "value is {} bytes, limit is {MAX_VALUE_SIZE}",
            value.len()
        )));
    }
    Ok(())
}

/// Prefixes may be empty but not longer than a key.
pub(crate) fn validate_prefix(prefix: &[u8]) -> CoreResult<()> {
    if prefix.len() > MAX_KEY_SIZE {
        return Err(CoreError::invalid_args(format!(
            "prefix is {} bytes, limit is {MAX_KEY_SIZE}",
            prefix.len()
        )));
    }
    Ok(())
}

/// App, user and store identifiers: 1..=128 ASCII alphanumerics or `_`.
pub(crate) fn validate_identifier(kind: &str, id: &str) -> CoreResult<()> {
    let well_formed = !id.is_empty()
        && id.len() <= MAX_ID_LENGTH
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if well_formed {
        Ok(())
    } else {
        Err(CoreError::invalid_args(format!("malformed {kind} id {id:?}")))
    }
}
