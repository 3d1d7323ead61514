//! Segment record encoding.

use crate::crypto::CryptoManager;
use crate::error::{CoreError, CoreResult};
use crate::format::{crc32, decode_entry, encode_entry, ByteReader};
use crate::types::{Partition, SequenceNumber};

/// The record deletes its key.
pub const FLAG_TOMBSTONE: u8 = 0x01;
/// The body is sealed with the store key.
pub const FLAG_ENCRYPTED: u8 = 0x02;

const SEGMENT_AAD: &[u8] = b"distdb-segment";
const FIXED_SIZE: usize = 4 + 1 + 8 + 4;

/// One committed write or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    /// Partition of the key.
    pub partition: Partition,
    /// Entry key.
    pub key: Vec<u8>,
    /// New value, `None` for a tombstone.
    pub value: Option<Vec<u8>>,
    /// Commit that produced the record.
    pub sequence: SequenceNumber,
}

impl SegmentRecord {
    /// A live entry.
    #[must_use]
    pub fn put(partition: Partition, key: Vec<u8>, value: Vec<u8>, sequence: SequenceNumber) -> Self {
        Self {
            partition,
            key,
            value: Some(value),
            sequence,
        }
    }

    /// A deletion marker.
    #[must_use]
    pub fn tombstone(partition: Partition, key: Vec<u8>, sequence: SequenceNumber) -> Self {
        Self {
            partition,
            key,
            value: None,
            sequence,
        }
    }

    /// True for deletion markers.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Encodes the record, sealing the body when `cipher` is set.
    pub fn encode(&self, cipher: Option<&CryptoManager>) -> CoreResult<Vec<u8>> {
        let plain = encode_entry(
            self.partition,
            &self.key,
            self.value.as_deref().unwrap_or_default(),
        );
        let mut flags = 0u8;
        if self.is_tombstone() {
            flags |= FLAG_TOMBSTONE;
        }
        let body = match cipher {
            Some(c) => {
                flags |= FLAG_ENCRYPTED;
                c.seal(&plain, SEGMENT_AAD)?
            }
            None => plain,
        };
        let total = u32::try_from(FIXED_SIZE + body.len())
            .map_err(|_| CoreError::invalid_operation("segment record exceeds 4 GiB"))?;
        let mut buf = Vec::with_capacity(total as usize);
        buf.extend_from_slice(&total.to_le_bytes());
        buf.push(flags);
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.extend_from_slice(&body);
        let crc = crc32(&buf[4..]);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a full record. Checksum, flag and authentication failures are
    /// all reported as corruption.
    pub fn decode(bytes: &[u8], cipher: Option<&CryptoManager>) -> CoreResult<Self> {
        if bytes.len() < FIXED_SIZE {
            return Err(CoreError::corrupted("segment record too short"));
        }
        let (framed, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32(&framed[4..]) != stored {
            return Err(CoreError::corrupted("segment record checksum mismatch"));
        }
        let mut r = ByteReader::new(framed, "segment record");
        let len = r.u32()? as usize;
        if len != bytes.len() {
            return Err(CoreError::corrupted("segment record length mismatch"));
        }
        let flags = r.u8()?;
        let sequence = SequenceNumber::new(r.u64()?);
        let body = r.rest();
        let plain = match (flags & FLAG_ENCRYPTED != 0, cipher) {
            (true, Some(c)) => c.open(body, SEGMENT_AAD)?,
            (false, None) => body.to_vec(),
            (true, None) => return Err(CoreError::corrupted("encrypted record in plain store")),
            (false, Some(_)) => return Err(CoreError::corrupted("plain record in encrypted store")),
        };
        let (partition, key, value) = decode_entry(&plain, "segment entry")?;
        Ok(Self {
            partition,
            key,
            value: (flags & FLAG_TOMBSTONE == 0).then_some(value),
            sequence,
        })
    }
}
