//! WAL record types and payload encoding.

use crate::crypto::CryptoManager;
use crate::error::{CoreError, CoreResult};
use crate::format::{decode_entry, encode_entry, ByteReader};
use crate::types::{Partition, SequenceNumber, TransactionId};

/// Magic bytes opening every WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"DWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

const WAL_AAD: &[u8] = b"distdb-wal";

/// Record type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Transaction start.
    Begin = 1,
    /// Entry write.
    Put = 2,
    /// Entry removal.
    Delete = 3,
    /// Transaction commit.
    Commit = 4,
}

impl WalRecordType {
    /// Parses a type tag.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Commit),
            _ => None,
        }
    }

    /// The tag byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One logical WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Opens transaction `txid`.
    Begin {
        /// Transaction id.
        txid: TransactionId,
    },
    /// Writes `value` under `key` in `partition`.
    Put {
        /// Transaction id.
        txid: TransactionId,
        /// Target partition.
        partition: Partition,
        /// Entry key.
        key: Vec<u8>,
        /// New value.
        value: Vec<u8>,
    },
    /// Removes `key` from `partition`.
    Delete {
        /// Transaction id.
        txid: TransactionId,
        /// Target partition.
        partition: Partition,
        /// Entry key.
        key: Vec<u8>,
    },
    /// Marks `txid` durable with commit order `sequence`.
    Commit {
        /// Transaction id.
        txid: TransactionId,
        /// Commit sequence number.
        sequence: SequenceNumber,
    },
}

impl WalRecord {
    /// Type tag of this record.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Begin { .. } => WalRecordType::Begin,
            Self::Put { .. } => WalRecordType::Put,
            Self::Delete { .. } => WalRecordType::Delete,
            Self::Commit { .. } => WalRecordType::Commit,
        }
    }

    /// Transaction the record belongs to.
    #[must_use]
    pub fn txid(&self) -> TransactionId {
        match self {
            Self::Begin { txid }
            | Self::Put { txid, .. }
            | Self::Delete { txid, .. }
            | Self::Commit { txid, .. } => *txid,
        }
    }

    /// Encodes the payload. Entry bodies are sealed when `cipher` is set.
    pub fn encode_payload(&self, cipher: Option<&CryptoManager>) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.txid().as_u64().to_le_bytes());
        match self {
            Self::Begin { .. } => {}
            Self::Put {
                partition,
                key,
                value,
                ..
            } => buf.extend_from_slice(&seal(encode_entry(*partition, key, value), cipher)?),
            Self::Delete { partition, key, .. } => {
                buf.extend_from_slice(&seal(encode_entry(*partition, key, &[]), cipher)?);
            }
            Self::Commit { sequence, .. } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Decodes a payload of type `record_type`.
    pub fn decode_payload(
        record_type: WalRecordType,
        payload: &[u8],
        cipher: Option<&CryptoManager>,
    ) -> CoreResult<Self> {
        let mut r = ByteReader::new(payload, "WAL record");
        let txid = TransactionId::new(r.u64()?);
        let record = match record_type {
            WalRecordType::Begin => Self::Begin { txid },
            WalRecordType::Commit => Self::Commit {
                txid,
                sequence: SequenceNumber::new(r.u64()?),
            },
            WalRecordType::Put | WalRecordType::Delete => {
                let body = open(r.rest(), cipher)?;
                let (partition, key, value) = decode_entry(&body, "WAL entry")?;
                if record_type == WalRecordType::Put {
                    Self::Put {
                        txid,
                        partition,
                        key,
                        value,
                    }
                } else {
                    Self::Delete {
                        txid,
                        partition,
                        key,
                    }
                }
            }
        };
        r.finish()?;
        Ok(record)
    }
}

fn seal(body: Vec<u8>, cipher: Option<&CryptoManager>) -> CoreResult<Vec<u8>> {
    match cipher {
        Some(c) => c.seal(&body, WAL_AAD),
        None => Ok(body),
    }
}

fn open(body: &[u8], cipher: Option<&CryptoManager>) -> CoreResult<Vec<u8>> {
    match cipher {
        Some(c) => c
            .open(body, WAL_AAD)
            .map_err(|_| CoreError::corrupted("WAL entry failed authentication")),
        None => Ok(body.to_vec()),
    }
}
