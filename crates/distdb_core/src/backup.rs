//! Backup files for export and import.
//!
//! A backup is one self-describing snapshot of both partitions of a store:
//!
//! ```text
//! | magic "DDBK" (4) | version (2) | kind (1) | flags (1) | salt (16) |
//! | sequence (8) | created_at_ms (8) | entry_count (4) | body_len (8) |
//! | body (body_len) | sha256 (32) |
//! ```
//!
//! The body is the list of `partition | key | value` entries. When a password
//! is given the body is sealed with a key derived from it and the salt, and
//! the header is bound to the seal as associated data. The trailing digest
//! covers everything before it.
//!
//! Every reason to refuse a file at import time (missing, foreign format,
//! wrong password, other store kind) is reported as `InvalidFile`.

use crate::crypto::{random_salt, CipherPassword, CryptoManager, KeyPurpose, SALT_SIZE};
use crate::error::{CoreError, CoreResult};
use crate::format::{decode_entry, encode_entry, ByteReader};
use crate::manifest::now_ms;
use crate::types::{Entry, Partition, SequenceNumber, StoreKind};
use distdb_storage::{FileBackend, StorageBackend, StorageError};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes opening a backup file.
pub const BACKUP_MAGIC: [u8; 4] = *b"DDBK";
/// Current backup format.
pub const BACKUP_VERSION: u16 = 1;

const FLAG_ENCRYPTED: u8 = 0x01;
const HEADER_SIZE: usize = 4 + 2 + 1 + 1 + SALT_SIZE + 8 + 8 + 4 + 8;
const DIGEST_SIZE: usize = 32;
/// Length prefix, partition tag and the two field lengths of an empty entry.
const MIN_ENTRY_SIZE: usize = 4 + 1 + 4 + 4;

/// Header fields of a backup file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupMetadata {
    /// Kind of the exporting store.
    pub kind: StoreKind,
    /// True when the body is password-sealed.
    pub encrypted: bool,
    /// Last commit contained in the snapshot.
    pub sequence: SequenceNumber,
    /// Export time, milliseconds since the epoch.
    pub created_at_ms: u64,
    /// Entries across both partitions.
    pub entry_count: u32,
}

struct Header {
    meta: BackupMetadata,
    salt: [u8; SALT_SIZE],
    body_len: u64,
}

impl Header {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&BACKUP_MAGIC);
        buf.extend_from_slice(&BACKUP_VERSION.to_le_bytes());
        buf.push(self.meta.kind.as_byte());
        buf.push(if self.meta.encrypted { FLAG_ENCRYPTED } else { 0 });
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&self.meta.sequence.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.meta.created_at_ms.to_le_bytes());
        buf.extend_from_slice(&self.meta.entry_count.to_le_bytes());
        buf.extend_from_slice(&self.body_len.to_le_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut r = ByteReader::new(bytes, "backup header");
        if r.array::<4>()? != BACKUP_MAGIC {
            return Err(CoreError::invalid_file("not a backup file"));
        }
        let version = r.u16()?;
        if version != BACKUP_VERSION {
            return Err(CoreError::invalid_file(format!(
                "unsupported backup version {version}"
            )));
        }
        let kind_tag = r.u8()?;
        let kind = StoreKind::from_byte(kind_tag)
            .ok_or_else(|| CoreError::invalid_file(format!("unknown store kind {kind_tag}")))?;
        let flags = r.u8()?;
        let salt = r.array::<SALT_SIZE>()?;
        let sequence = SequenceNumber::new(r.u64()?);
        let created_at_ms = r.u64()?;
        let entry_count = r.u32()?;
        let body_len = r.u64()?;
        Ok(Self {
            meta: BackupMetadata {
                kind,
                encrypted: flags & FLAG_ENCRYPTED != 0,
                sequence,
                created_at_ms,
                entry_count,
            },
            salt,
            body_len,
        })
    }
}

/// Serializes a snapshot into backup bytes.
pub fn encode_backup(
    kind: StoreKind,
    sequence: SequenceNumber,
    entries: &[(Partition, Entry)],
    password: &CipherPassword,
) -> CoreResult<Vec<u8>> {
    let mut body = Vec::new();
    for (partition, entry) in entries {
        let encoded = encode_entry(*partition, &entry.key, &entry.value);
        body.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        body.extend_from_slice(&encoded);
    }
    let entry_count = u32::try_from(entries.len())
        .map_err(|_| CoreError::over_max_limits("too many entries for one backup"))?;
    let encrypted = !password.is_empty();
    let salt = if encrypted { random_salt() } else { [0u8; SALT_SIZE] };
    let mut header = Header {
        meta: BackupMetadata {
            kind,
            encrypted,
            sequence,
            created_at_ms: now_ms(),
            entry_count,
        },
        salt,
        body_len: 0,
    };
    let body = if encrypted {
        // The sealed length is known up front: nonce and tag are fixed size.
        header.body_len =
            (body.len() + crate::crypto::NONCE_SIZE + crate::crypto::TAG_SIZE) as u64;
        let cipher = CryptoManager::from_password(password, &salt, KeyPurpose::Backup)?;
        cipher.seal(&body, &header.encode())?
    } else {
        header.body_len = body.len() as u64;
        body
    };
    let mut out = header.encode();
    out.extend_from_slice(&body);
    let digest = Sha256::digest(&out);
    out.extend_from_slice(&digest);
    Ok(out)
}

/// Reads only the header, after checking the digest.
pub fn decode_metadata(bytes: &[u8]) -> CoreResult<BackupMetadata> {
    let (header, _) = split_checked(bytes)?;
    Ok(header.meta)
}

/// Parses backup bytes for a store of `expected` kind opened with `password`.
pub fn decode_backup(
    bytes: &[u8],
    expected: StoreKind,
    password: &CipherPassword,
) -> CoreResult<(BackupMetadata, Vec<(Partition, Entry)>)> {
    let (header, body) = split_checked(bytes)?;
    if header.meta.kind != expected {
        return Err(CoreError::invalid_file(format!(
            "backup of a {:?} store cannot be imported into a {expected:?} store",
            header.meta.kind
        )));
    }
    let body = match (header.meta.encrypted, password.is_empty()) {
        (false, true) => body.to_vec(),
        (false, false) => {
            return Err(CoreError::invalid_file(
                "backup is not encrypted but a password was given",
            ))
        }
        (true, true) => {
            return Err(CoreError::invalid_file(
                "backup is encrypted but no password was given",
            ))
        }
        (true, false) => {
            let cipher =
                CryptoManager::from_password(password, &header.salt, KeyPurpose::Backup)?;
            cipher
                .open(body, &bytes[..HEADER_SIZE])
                .map_err(|_| CoreError::invalid_file("backup password does not match"))?
        }
    };
    let entries = decode_body(&body, header.meta.entry_count).map_err(into_invalid_file)?;
    Ok((header.meta, entries))
}

fn split_checked(bytes: &[u8]) -> CoreResult<(Header, &[u8])> {
    if bytes.len() < HEADER_SIZE + DIGEST_SIZE {
        return Err(CoreError::invalid_file("backup file is truncated"));
    }
    let (content, digest) = bytes.split_at(bytes.len() - DIGEST_SIZE);
    let header = Header::decode(&content[..HEADER_SIZE]).map_err(into_invalid_file)?;
    if Sha256::digest(content).as_slice() != digest {
        return Err(CoreError::invalid_file("backup checksum mismatch"));
    }
    let body = &content[HEADER_SIZE..];
    if body.len() as u64 != header.body_len {
        return Err(CoreError::invalid_file("backup body length mismatch"));
    }
    Ok((header, body))
}

fn decode_body(body: &[u8], count: u32) -> CoreResult<Vec<(Partition, Entry)>> {
    let count = count as usize;
    if count > body.len() / MIN_ENTRY_SIZE {
        return Err(CoreError::invalid_file(format!(
            "{count} entries cannot fit in a {}-byte body",
            body.len()
        )));
    }
    let mut r = ByteReader::new(body, "backup body");
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let (partition, key, value) = decode_entry(r.prefixed()?, "backup entry")?;
        entries.push((partition, Entry { key, value }));
    }
    r.finish()?;
    Ok(entries)
}

fn into_invalid_file(e: CoreError) -> CoreError {
    match e {
        CoreError::Corrupted { message } => CoreError::InvalidFile { message },
        other => other,
    }
}

/// Fails with `InvalidArgs` unless the parent directory of `path` exists.
/// A bare file name refers to the working directory.
pub fn check_parent_dir(path: &Path) -> CoreResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if path.file_name().is_none() {
        return Err(CoreError::invalid_args(format!(
            "backup path {} has no file name",
            path.display()
        )));
    }
    if !parent.is_dir() {
        return Err(CoreError::invalid_args(format!(
            "directory {} does not exist",
            parent.display()
        )));
    }
    Ok(())
}

/// Writes `bytes` to a new file at `path`. An existing file is never
/// touched; a partially written file is removed.
pub fn write_backup_file(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    let mut backend = match FileBackend::create_new(path) {
        Ok(backend) => backend,
        Err(StorageError::AlreadyExists { .. }) => {
            return Err(CoreError::FileAlreadyExisted {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    if let Err(e) = append_synced(&mut backend, bytes) {
        drop(backend);
        if let Err(cleanup) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %cleanup, "could not remove partial backup");
        }
        return Err(e.into());
    }
    debug!(path = %path.display(), bytes = bytes.len(), "backup written");
    Ok(())
}

fn append_synced(backend: &mut FileBackend, bytes: &[u8]) -> Result<(), StorageError> {
    backend.append(bytes)?;
    backend.flush()?;
    backend.sync()
}

/// Reads a backup file; a missing file is `InvalidFile`.
pub fn read_backup_file(path: &Path) -> CoreResult<Vec<u8>> {
    match FileBackend::open_existing(path) {
        Ok(backend) => Ok(backend.read_all()?),
        Err(e) if e.is_not_found() => Err(CoreError::invalid_file(format!(
            "backup {} does not exist",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}
