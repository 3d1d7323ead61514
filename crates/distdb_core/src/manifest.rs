//! Store manifest: kind, encryption parameters and creation metadata.

use crate::crypto::{random_salt, CipherPassword, CryptoManager, KeyPurpose, SALT_SIZE};
use crate::error::{CoreError, CoreResult};
use crate::format::{crc32, put_prefixed, ByteReader};
use crate::types::StoreKind;
use std::time::{SystemTime, UNIX_EPOCH};

/// Magic bytes opening a manifest.
pub const MANIFEST_MAGIC: [u8; 4] = *b"DDBM";
/// Current manifest format.
pub const MANIFEST_VERSION: u16 = 1;

/// Key material stored for an encrypted store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfo {
    /// HKDF salt for the store key.
    pub salt: [u8; SALT_SIZE],
    /// Canary sealed with the store key.
    pub key_check: Vec<u8>,
}

/// Persistent description of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Store flavor.
    pub kind: StoreKind,
    /// Present when records are encrypted.
    pub encryption: Option<EncryptionInfo>,
    /// Opaque schema text given at creation.
    pub schema: Option<String>,
    /// Creation time, milliseconds since the epoch.
    pub created_at_ms: u64,
}

impl Manifest {
    /// Describes a new store, drawing a fresh salt when `password` is set.
    /// Returns the cipher the store must use.
    pub fn create(
        kind: StoreKind,
        password: &CipherPassword,
        schema: Option<String>,
    ) -> CoreResult<(Self, Option<CryptoManager>)> {
        let (encryption, cipher) = Self::seal_key(password)?;
        let manifest = Self {
            kind,
            encryption,
            schema,
            created_at_ms: now_ms(),
        };
        Ok((manifest, cipher))
    }

    /// Copy of this manifest rekeyed to `password`.
    pub fn rekeyed(&self, password: &CipherPassword) -> CoreResult<(Self, Option<CryptoManager>)> {
        let (encryption, cipher) = Self::seal_key(password)?;
        Ok((
            Self {
                encryption,
                ..self.clone()
            },
            cipher,
        ))
    }

    fn seal_key(
        password: &CipherPassword,
    ) -> CoreResult<(Option<EncryptionInfo>, Option<CryptoManager>)> {
        if password.is_empty() {
            return Ok((None, None));
        }
        let salt = random_salt();
        let cipher = CryptoManager::from_password(password, &salt, KeyPurpose::Store)?;
        let key_check = cipher.key_check()?;
        Ok((Some(EncryptionInfo { salt, key_check }), Some(cipher)))
    }

    /// Derives the store cipher from `password`, failing with
    /// `InvalidPassword` when the password does not match the manifest.
    pub fn unlock(&self, password: &CipherPassword) -> CoreResult<Option<CryptoManager>> {
        match (&self.encryption, password.is_empty()) {
            (None, true) => Ok(None),
            (None, false) | (Some(_), true) => Err(CoreError::InvalidPassword),
            (Some(info), false) => {
                let cipher = CryptoManager::from_password(password, &info.salt, KeyPurpose::Store)?;
                if cipher.verify_key_check(&info.key_check) {
                    Ok(Some(cipher))
                } else {
                    Err(CoreError::InvalidPassword)
                }
            }
        }
    }

    /// True when records are encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// Serializes with a trailing CRC32.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.push(self.kind.as_byte());
        match &self.encryption {
            Some(info) => {
                buf.push(1);
                buf.extend_from_slice(&info.salt);
                put_prefixed(&mut buf, &info.key_check);
            }
            None => buf.push(0),
        }
        match &self.schema {
            Some(schema) => {
                buf.push(1);
                put_prefixed(&mut buf, schema.as_bytes());
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&self.created_at_ms.to_le_bytes());
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parses a manifest; any damage is corruption.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < 4 {
            return Err(CoreError::corrupted("manifest too short"));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32(body) != stored {
            return Err(CoreError::corrupted("manifest checksum mismatch"));
        }
        let mut r = ByteReader::new(body, "manifest");
        if r.array::<4>()? != MANIFEST_MAGIC {
            return Err(CoreError::corrupted("bad manifest magic"));
        }
        let version = r.u16()?;
        if version != MANIFEST_VERSION {
            return Err(CoreError::corrupted(format!(
                "unsupported manifest version {version}"
            )));
        }
        let kind_byte = r.u8()?;
        let kind = StoreKind::from_byte(kind_byte)
            .ok_or_else(|| CoreError::corrupted(format!("unknown store kind {kind_byte}")))?;
        let encryption = match r.u8()? {
            0 => None,
            _ => Some(EncryptionInfo {
                salt: r.array()?,
                key_check: r.prefixed()?.to_vec(),
            }),
        };
        let schema = match r.u8()? {
            0 => None,
            _ => Some(
                String::from_utf8(r.prefixed()?.to_vec())
                    .map_err(|_| CoreError::corrupted("manifest schema is not UTF-8"))?,
            ),
        };
        let created_at_ms = r.u64()?;
        r.finish()?;
        Ok(Self {
            kind,
            encryption,
            schema,
            created_at_ms,
        })
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
