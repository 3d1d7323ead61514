//! WAL writer and recovery reader.

use crate::crypto::CryptoManager;
use crate::error::{CoreError, CoreResult};
use crate::format::{crc32, ByteReader};
use crate::types::{Partition, SequenceNumber, TransactionId};
use crate::wal::record::{WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
use distdb_storage::StorageBackend;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// A mutation carried by a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalOp {
    /// Write a value.
    Put {
        /// Target partition.
        partition: Partition,
        /// Key.
        key: Vec<u8>,
        /// Value.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Target partition.
        partition: Partition,
        /// Key.
        key: Vec<u8>,
    },
}

impl WalOp {
    fn into_record(self, txid: TransactionId) -> WalRecord {
        match self {
            Self::Put {
                partition,
                key,
                value,
            } => WalRecord::Put {
                txid,
                partition,
                key,
                value,
            },
            Self::Delete { partition, key } => WalRecord::Delete {
                txid,
                partition,
                key,
            },
        }
    }
}

/// A transaction whose Commit record was found intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    /// Transaction id.
    pub txid: TransactionId,
    /// Commit order.
    pub sequence: SequenceNumber,
    /// Mutations in log order.
    pub ops: Vec<WalOp>,
}

/// Appends framed records to a backend and reads them back at recovery.
pub struct WalManager {
    backend: Box<dyn StorageBackend>,
    cipher: Option<Arc<CryptoManager>>,
}

impl WalManager {
    /// Wraps a backend. `cipher` seals entry bodies.
    pub fn new(backend: Box<dyn StorageBackend>, cipher: Option<Arc<CryptoManager>>) -> Self {
        Self { backend, cipher }
    }

    fn frame(&self, record: &WalRecord, out: &mut Vec<u8>) -> CoreResult<()> {
        let payload = record.encode_payload(self.cipher.as_deref())?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("WAL payload exceeds 4 GiB"))?;
        let start = out.len();
        out.extend_from_slice(&WAL_MAGIC);
        out.extend_from_slice(&WAL_VERSION.to_le_bytes());
        out.push(record.record_type().as_byte());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&payload);
        let crc = crc32(&out[start..]);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    /// Appends one record and returns its offset. Tests use it to leave
    /// transactions without a commit record.
    #[cfg(test)]
    pub(crate) fn append(&mut self, record: &WalRecord) -> CoreResult<u64> {
        let mut buf = Vec::new();
        self.frame(record, &mut buf)?;
        Ok(self.backend.append(&buf)?)
    }

    /// Writes a whole transaction with a single append, then flushes it and,
    /// when `sync` is set, fsyncs it.
    pub fn append_transaction(
        &mut self,
        txid: TransactionId,
        sequence: SequenceNumber,
        ops: Vec<WalOp>,
        sync: bool,
    ) -> CoreResult<()> {
        let mut buf = Vec::new();
        self.frame(&WalRecord::Begin { txid }, &mut buf)?;
        for op in ops {
            self.frame(&op.into_record(txid), &mut buf)?;
        }
        self.frame(&WalRecord::Commit { txid, sequence }, &mut buf)?;
        self.backend.append(&buf)?;
        self.backend.flush()?;
        if sync {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Reads every intact record with its offset.
    pub fn read_all(&self) -> CoreResult<Vec<(u64, WalRecord)>> {
        let bytes = self.backend.read_all()?;
        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let rest = &bytes[pos..];
            if rest.len() < HEADER_SIZE {
                warn!(offset = pos, "discarding torn WAL header");
                break;
            }
            let mut header = ByteReader::new(&rest[..HEADER_SIZE], "WAL header");
            let magic: [u8; 4] = header.array()?;
            let version = header.u16()?;
            let type_byte = header.u8()?;
            let len = header.u32()? as usize;
            if magic != WAL_MAGIC {
                return Err(CoreError::corrupted(format!("bad WAL magic at offset {pos}")));
            }
            if version != WAL_VERSION {
                return Err(CoreError::corrupted(format!(
                    "unsupported WAL version {version} at offset {pos}"
                )));
            }
            let total = HEADER_SIZE + len + CRC_SIZE;
            if rest.len() < total {
                warn!(offset = pos, "discarding torn WAL payload");
                break;
            }
            let stored = u32::from_le_bytes([
                rest[total - 4],
                rest[total - 3],
                rest[total - 2],
                rest[total - 1],
            ]);
            if crc32(&rest[..total - CRC_SIZE]) != stored {
                if rest.len() == total {
                    warn!(offset = pos, "discarding WAL tail with bad checksum");
                    break;
                }
                return Err(CoreError::corrupted(format!(
                    "WAL checksum mismatch at offset {pos}"
                )));
            }
            let record_type = WalRecordType::from_byte(type_byte).ok_or_else(|| {
                CoreError::corrupted(format!("unknown WAL record type {type_byte}"))
            })?;
            let record = WalRecord::decode_payload(
                record_type,
                &rest[HEADER_SIZE..HEADER_SIZE + len],
                self.cipher.as_deref(),
            )?;
            records.push((pos as u64, record));
            pos += total;
        }
        Ok(records)
    }

    /// Returns committed transactions in commit order. Transactions without
    /// an intact Commit record are dropped.
    pub fn committed(&self) -> CoreResult<Vec<CommittedTransaction>> {
        let mut open: HashMap<TransactionId, Vec<WalOp>> = HashMap::new();
        let mut done = Vec::new();
        for (_, record) in self.read_all()? {
            match record {
                WalRecord::Begin { txid } => {
                    open.insert(txid, Vec::new());
                }
                WalRecord::Put {
                    txid,
                    partition,
                    key,
                    value,
                } => open.entry(txid).or_default().push(WalOp::Put {
                    partition,
                    key,
                    value,
                }),
                WalRecord::Delete {
                    txid,
                    partition,
                    key,
                } => open
                    .entry(txid)
                    .or_default()
                    .push(WalOp::Delete { partition, key }),
                WalRecord::Commit { txid, sequence } => {
                    let ops = open.remove(&txid).unwrap_or_default();
                    done.push(CommittedTransaction {
                        txid,
                        sequence,
                        ops,
                    });
                }
            }
        }
        done.sort_by_key(|t| t.sequence);
        Ok(done)
    }

    /// Bytes currently in the log.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Drops every record. Called once segments hold everything durably.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.backend.clear()?;
        Ok(())
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("encrypted", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}
