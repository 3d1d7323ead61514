//! Durable state of one store: WAL plus segment file.

use crate::crypto::CryptoManager;
use crate::error::CoreResult;
use crate::segment::{RecordPointer, SegmentRecord, SegmentStore};
use crate::types::{Entry, Partition, SequenceNumber, TransactionId};
use crate::wal::{WalManager, WalOp};
use distdb_storage::{InMemoryBackend, StorageBackend};
use std::sync::Arc;
use tracing::{debug, info};

/// Segment files smaller than this are never compacted.
pub const COMPACTION_MIN_SIZE: u64 = 64 * 1024;

/// Durability knobs taken from the store configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Fsync the WAL at every commit.
    pub sync_on_commit: bool,
    /// WAL size that triggers a checkpoint.
    pub checkpoint_threshold: u64,
}

/// WAL, segments and commit counters of an open store.
///
/// Memory stores run without a WAL: segments are already the only copy.
pub struct Engine {
    wal: Option<WalManager>,
    segments: SegmentStore,
    sequence: SequenceNumber,
    next_txid: u64,
    options: EngineOptions,
}

impl Engine {
    /// Opens persistent files, replaying committed WAL transactions that the
    /// segment file does not fully contain, then checkpoints.
    pub fn open(
        wal_backend: Box<dyn StorageBackend>,
        segment_backend: Box<dyn StorageBackend>,
        cipher: Option<Arc<CryptoManager>>,
        options: EngineOptions,
    ) -> CoreResult<Self> {
        let wal = WalManager::new(wal_backend, cipher.clone());
        let mut segments = SegmentStore::open(segment_backend, cipher)?;
        let applied = segments.max_sequence();
        let mut sequence = applied;
        let mut replayed = 0usize;
        // The newest transaction present in segments may be partial; replay it
        // together with everything after it.
        for txn in wal.committed()? {
            if txn.sequence < applied {
                continue;
            }
            for op in txn.ops {
                segments.append(&segment_record(op, txn.sequence))?;
            }
            sequence = sequence.max(txn.sequence);
            replayed += 1;
        }
        if replayed > 0 {
            info!(replayed, %sequence, "replayed committed WAL transactions");
        }
        let mut engine = Self {
            wal: Some(wal),
            segments,
            sequence,
            next_txid: sequence.as_u64() + 1,
            options,
        };
        engine.checkpoint()?;
        Ok(engine)
    }

    /// Creates an empty memory-only engine.
    pub fn in_memory() -> CoreResult<Self> {
        Ok(Self {
            wal: None,
            segments: SegmentStore::open(Box::new(InMemoryBackend::new()), None)?,
            sequence: SequenceNumber::default(),
            next_txid: 1,
            options: EngineOptions {
                sync_on_commit: false,
                checkpoint_threshold: 0,
            },
        })
    }

    /// Applies `ops` atomically: WAL first, then segments. Returns the new
    /// commit sequence number.
    pub fn commit(&mut self, ops: Vec<WalOp>) -> CoreResult<SequenceNumber> {
        if ops.is_empty() {
            return Ok(self.sequence);
        }
        let sequence = self.sequence.next();
        let txid = TransactionId::new(self.next_txid);
        self.next_txid += 1;
        if let Some(wal) = self.wal.as_mut() {
            wal.append_transaction(txid, sequence, ops.clone(), self.options.sync_on_commit)?;
        }
        let count = ops.len();
        for op in ops {
            self.segments.append(&segment_record(op, sequence))?;
        }
        self.sequence = sequence;
        debug!(%txid, %sequence, ops = count, "commit applied");
        let wal_size = match &self.wal {
            Some(wal) => wal.size()?,
            None => 0,
        };
        if wal_size >= self.options.checkpoint_threshold && wal_size > 0 {
            self.checkpoint()?;
        }
        Ok(sequence)
    }

    /// Makes segments durable and empties the WAL.
    pub fn checkpoint(&mut self) -> CoreResult<()> {
        if let Some(wal) = self.wal.as_mut() {
            self.segments.sync()?;
            wal.clear()?;
        }
        Ok(())
    }

    /// True when a persistent segment file has grown past
    /// [`COMPACTION_MIN_SIZE`] and superseded records outweigh live ones.
    pub fn needs_compaction(&self) -> CoreResult<bool> {
        if self.wal.is_none() {
            return Ok(false);
        }
        let size = self.segments.size()?;
        let live = self.segments.live_bytes();
        Ok(size >= COMPACTION_MIN_SIZE && size.saturating_sub(live) > live)
    }

    /// Bytes in the segment file.
    pub fn segment_size(&self) -> CoreResult<u64> {
        self.segments.size()
    }

    /// Current value of a key.
    pub fn get(&self, partition: Partition, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.segments.get(partition, key)
    }

    /// True when the key is live.
    #[must_use]
    pub fn contains(&self, partition: Partition, key: &[u8]) -> bool {
        self.segments.contains(partition, key)
    }

    /// Entries of a partition under `prefix`, in key order.
    pub fn scan(&self, partition: Partition, prefix: &[u8]) -> CoreResult<Vec<Entry>> {
        self.segments.scan(partition, prefix)
    }

    /// Pointers for lazy iteration.
    #[must_use]
    pub fn scan_pointers(&self, partition: Partition, prefix: &[u8]) -> Vec<(Vec<u8>, RecordPointer)> {
        self.segments.scan_pointers(partition, prefix)
    }

    /// Value stored at a pointer obtained from [`scan_pointers`](Self::scan_pointers).
    pub fn read_value(&self, pointer: RecordPointer) -> CoreResult<Vec<u8>> {
        self.segments.read_value(pointer)
    }

    /// Every live entry of both partitions.
    pub fn snapshot(&self) -> CoreResult<Vec<(Partition, Entry)>> {
        let mut out = Vec::with_capacity(self.segments.live_count());
        for partition in [Partition::Native, Partition::LocalOnly] {
            out.extend(
                self.segments
                    .scan(partition, b"")?
                    .into_iter()
                    .map(|entry| (partition, entry)),
            );
        }
        Ok(out)
    }

    /// Last committed sequence number.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Live keys across both partitions.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.segments.live_count()
    }
}

/// Writes `entries` as a fresh segment file into `backend` and syncs it.
/// Every record carries `sequence`, which the reopened engine resumes from.
pub fn write_segment_file(
    backend: Box<dyn StorageBackend>,
    cipher: Option<Arc<CryptoManager>>,
    entries: &[(Partition, Entry)],
    sequence: SequenceNumber,
) -> CoreResult<()> {
    let mut segments = SegmentStore::open(backend, cipher)?;
    for (partition, entry) in entries {
        segments.append(&SegmentRecord::put(
            *partition,
            entry.key.clone(),
            entry.value.clone(),
            sequence,
        ))?;
    }
    segments.sync()
}

fn segment_record(op: WalOp, sequence: SequenceNumber) -> SegmentRecord {
    match op {
        WalOp::Put {
            partition,
            key,
            value,
        } => SegmentRecord::put(partition, key, value, sequence),
        WalOp::Delete { partition, key } => SegmentRecord::tombstone(partition, key, sequence),
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sequence", &self.sequence)
            .field("persistent", &self.wal.is_some())
            .finish_non_exhaustive()
    }
}
