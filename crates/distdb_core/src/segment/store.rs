//! Segment file with its in-memory key index.

use crate::crypto::CryptoManager;
use crate::error::{CoreError, CoreResult};
use crate::segment::record::SegmentRecord;
use crate::types::{Entry, Partition, SequenceNumber};
use distdb_storage::StorageBackend;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tracing::warn;

/// Location of a live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPointer {
    /// Byte offset in the segment file.
    pub offset: u64,
    /// Encoded record length.
    pub len: u32,
    /// Commit that wrote it.
    pub sequence: SequenceNumber,
}

type IndexKey = (Partition, Vec<u8>);

/// Append-only record log plus an ordered index of live keys.
///
/// The file is never rewritten in place, so a [`RecordPointer`] stays readable
/// for as long as this store is in use, even after the key is overwritten.
/// Reclaiming superseded records means writing a new file.
pub struct SegmentStore {
    backend: Box<dyn StorageBackend>,
    cipher: Option<Arc<CryptoManager>>,
    index: BTreeMap<IndexKey, RecordPointer>,
    live_bytes: u64,
    max_sequence: SequenceNumber,
}

impl SegmentStore {
    /// Opens a segment file and rebuilds its index.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        cipher: Option<Arc<CryptoManager>>,
    ) -> CoreResult<Self> {
        let mut store = Self {
            backend,
            cipher,
            index: BTreeMap::new(),
            live_bytes: 0,
            max_sequence: SequenceNumber::default(),
        };
        store.rebuild_index()?;
        Ok(store)
    }

    /// Rescans the file. A torn final record is cut off; damage anywhere else
    /// is corruption.
    pub fn rebuild_index(&mut self) -> CoreResult<()> {
        let bytes = self.backend.read_all()?;
        let size = bytes.len();
        let mut index = BTreeMap::new();
        let mut max_sequence = SequenceNumber::default();
        let mut offset = 0usize;
        let mut torn_at = None;

        while offset < size {
            if size - offset < 4 {
                torn_at = Some(offset);
                break;
            }
            let len = u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]) as usize;
            if len == 0 {
                if bytes[offset..].iter().all(|b| *b == 0) {
                    torn_at = Some(offset);
                    break;
                }
                return Err(CoreError::corrupted(format!(
                    "zero-length segment record at offset {offset}"
                )));
            }
            if offset + len > size {
                torn_at = Some(offset);
                break;
            }
            let record = match SegmentRecord::decode(&bytes[offset..offset + len], self.cipher.as_deref()) {
                Ok(record) => record,
                Err(_) if offset + len == size => {
                    torn_at = Some(offset);
                    break;
                }
                Err(e) => return Err(e),
            };
            max_sequence = max_sequence.max(record.sequence);
            let pointer = RecordPointer {
                offset: offset as u64,
                len: len as u32,
                sequence: record.sequence,
            };
            let key = (record.partition, record.key);
            if record.value.is_some() {
                index.insert(key, pointer);
            } else {
                index.remove(&key);
            }
            offset += len;
        }

        if let Some(at) = torn_at {
            warn!(offset = at, size, "cutting torn segment tail");
            self.backend.truncate(at as u64)?;
        }
        self.live_bytes = index.values().map(|p| u64::from(p.len)).sum();
        self.index = index;
        self.max_sequence = max_sequence;
        Ok(())
    }

    /// Appends a record and updates the index.
    pub fn append(&mut self, record: &SegmentRecord) -> CoreResult<RecordPointer> {
        let encoded = record.encode(self.cipher.as_deref())?;
        let offset = self.backend.append(&encoded)?;
        let pointer = RecordPointer {
            offset,
            len: encoded.len() as u32,
            sequence: record.sequence,
        };
        let key = (record.partition, record.key.clone());
        let replaced = if record.is_tombstone() {
            self.index.remove(&key)
        } else {
            self.live_bytes += u64::from(pointer.len);
            self.index.insert(key, pointer)
        };
        if let Some(old) = replaced {
            self.live_bytes -= u64::from(old.len);
        }
        self.max_sequence = self.max_sequence.max(record.sequence);
        Ok(pointer)
    }

    /// Reads and verifies the record at `pointer`.
    pub fn read(&self, pointer: RecordPointer) -> CoreResult<SegmentRecord> {
        let bytes = self
            .backend
            .read_at(pointer.offset, pointer.len as usize)
            .map_err(|e| CoreError::corrupted(format!("segment read failed: {e}")))?;
        SegmentRecord::decode(&bytes, self.cipher.as_deref())
    }

    /// Reads the live value behind `pointer`.
    pub fn read_value(&self, pointer: RecordPointer) -> CoreResult<Vec<u8>> {
        self.read(pointer)?
            .value
            .ok_or_else(|| CoreError::corrupted("index points at a tombstone"))
    }

    /// Current value of a key.
    pub fn get(&self, partition: Partition, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        match self.pointer(partition, key) {
            Some(pointer) => self.read_value(pointer).map(Some),
            None => Ok(None),
        }
    }

    /// Index lookup without touching the file.
    #[must_use]
    pub fn pointer(&self, partition: Partition, key: &[u8]) -> Option<RecordPointer> {
        self.index.get(&(partition, key.to_vec())).copied()
    }

    /// True when the key is live.
    #[must_use]
    pub fn contains(&self, partition: Partition, key: &[u8]) -> bool {
        self.pointer(partition, key).is_some()
    }

    /// Live keys of `partition` starting with `prefix`, in key order.
    #[must_use]
    pub fn scan_pointers(&self, partition: Partition, prefix: &[u8]) -> Vec<(Vec<u8>, RecordPointer)> {
        let start = (partition, prefix.to_vec());
        self.index
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|((p, k), _)| *p == partition && k.starts_with(prefix))
            .map(|((_, k), ptr)| (k.clone(), *ptr))
            .collect()
    }

    /// Live entries of `partition` starting with `prefix`, in key order.
    pub fn scan(&self, partition: Partition, prefix: &[u8]) -> CoreResult<Vec<Entry>> {
        self.scan_pointers(partition, prefix)
            .into_iter()
            .map(|(key, ptr)| Ok(Entry::new(key, self.read_value(ptr)?)))
            .collect()
    }

    /// Number of live keys across both partitions.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.index.len()
    }

    /// Encoded size of the records the index points at. Everything else in
    /// the file is superseded or a tombstone.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// Highest sequence number seen in the file.
    #[must_use]
    pub fn max_sequence(&self) -> SequenceNumber {
        self.max_sequence
    }

    /// Flushes and fsyncs the file.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }

    /// Bytes in the file.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("live", &self.index.len())
            .field("max_sequence", &self.max_sequence)
            .finish_non_exhaustive()
    }
}
