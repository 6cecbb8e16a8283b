// Persistent raft log on RocksDB.
//
// One keyspace, no column families: entries live under an `e` prefix
// keyed by big-endian index, and the two durable scalars the protocol
// needs (the vote and the purge watermark) live under `m:` keys that
// sort after every entry. Truncation from either end is a single range
// delete. Hot metadata is mirrored in memory behind one mutex shared
// with readers, so log-state and vote queries never touch disk.

#![allow(clippy::result_large_err)]

use std::fmt::Debug;
use std::ops::{Bound, RangeBounds};
use std::path::Path;
use std::sync::Arc;

use openraft::storage::{LogFlushed, LogState, RaftLogStorage};
use openraft::{
    Entry, ErrorSubject, ErrorVerb, LogId, OptionalSend, RaftLogReader, StorageError, Vote,
};
use parking_lot::Mutex;
use rocksdb::{DB, Options, WriteBatch};
use tracing::debug;

use super::types::{NodeId, TypeConfig};

const ENTRY_PREFIX: u8 = b'e';
const META_VOTE: &[u8] = b"m:vote";
const META_PURGED: &[u8] = b"m:purged";

fn storage_error(
    subject: ErrorSubject<NodeId>,
    verb: ErrorVerb,
    e: impl std::fmt::Display,
) -> StorageError<NodeId> {
    StorageError::from_io_error(subject, verb, std::io::Error::other(e.to_string()))
}

/// Key of the entry at `index`: the prefix byte followed by the
/// big-endian index, so RocksDB key order equals index order.
fn entry_key(index: u64) -> [u8; 9] {
    let mut key = [ENTRY_PREFIX; 9];
    key[1..].copy_from_slice(&index.to_be_bytes());
    key
}

/// Smallest key strictly greater than every entry key up to and
/// including `index`; used as the exclusive end of range deletes and
/// scans.
fn entry_key_after(index: u64) -> Vec<u8> {
    match index.checked_add(1) {
        Some(next) => entry_key(next).to_vec(),
        None => vec![ENTRY_PREFIX + 1],
    }
}

/// In-memory mirror of the log's durable metadata.
#[derive(Clone, Copy, Default)]
struct LogMeta {
    vote: Option<Vote<NodeId>>,
    last_log_id: Option<LogId<NodeId>>,
    last_purged: Option<LogId<NodeId>>,
}

/// RocksDB log store for the registry raft group. Cloning shares the
/// database handle and the metadata mirror, which is how log readers
/// are handed out.
#[derive(Clone)]
pub struct RocksLogStore {
    db: Arc<DB>,
    meta: Arc<Mutex<LogMeta>>,
}

impl RocksLogStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError<NodeId>> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let db = DB::open(&opts, path)
            .map_err(|e| storage_error(ErrorSubject::Logs, ErrorVerb::Read, e))?;

        let store = Self {
            db: Arc::new(db),
            meta: Arc::new(Mutex::new(LogMeta::default())),
        };
        store.recover_meta()?;
        Ok(store)
    }

    /// Rebuild the metadata mirror from disk. A fully purged log has no
    /// entries left, so the purge watermark doubles as the last log id.
    fn recover_meta(&self) -> Result<(), StorageError<NodeId>> {
        let vote = self.read_meta::<Vote<NodeId>>(META_VOTE, ErrorSubject::Vote)?;
        let last_purged = self.read_meta::<LogId<NodeId>>(META_PURGED, ErrorSubject::Logs)?;
        let last_log_id = self.last_entry()?.map(|e| e.log_id).or(last_purged);
        *self.meta.lock() = LogMeta {
            vote,
            last_log_id,
            last_purged,
        };
        Ok(())
    }

    fn read_meta<T: serde::de::DeserializeOwned>(
        &self,
        key: &[u8],
        subject: ErrorSubject<NodeId>,
    ) -> Result<Option<T>, StorageError<NodeId>> {
        let Some(bytes) = self
            .db
            .get(key)
            .map_err(|e| storage_error(subject.clone(), ErrorVerb::Read, e))?
        else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| storage_error(subject, ErrorVerb::Read, e))?;
        Ok(Some(value))
    }

    fn last_entry(&self) -> Result<Option<Entry<TypeConfig>>, StorageError<NodeId>> {
        let mut iter = self.db.raw_iterator();
        iter.seek_for_prev(entry_key(u64::MAX));
        if iter.valid()
            && let (Some(key), Some(bytes)) = (iter.key(), iter.value())
            && key.first() == Some(&ENTRY_PREFIX)
        {
            return Ok(Some(decode_entry(bytes)?));
        }
        Ok(None)
    }

    /// Persist a batch of entries and advance the last-log-id mirror.
    /// Shared by the trait's `append` and the tests.
    fn write_entries(&self, entries: &[Entry<TypeConfig>]) -> Result<(), StorageError<NodeId>> {
        let mut batch = WriteBatch::default();
        for entry in entries {
            batch.put(entry_key(entry.log_id.index), encode_entry(entry)?);
        }
        self.db
            .write(batch)
            .map_err(|e| storage_error(ErrorSubject::Logs, ErrorVerb::Write, e))?;

        if let Some(entry) = entries.last() {
            self.meta.lock().last_log_id = Some(entry.log_id);
        }
        Ok(())
    }

    /// Drop every entry with index in `[from, to]` in one range delete.
    fn delete_entries(&self, from: u64, to: u64) -> Result<(), StorageError<NodeId>> {
        let mut batch = WriteBatch::default();
        batch.delete_range(entry_key(from).to_vec(), entry_key_after(to));
        self.db
            .write(batch)
            .map_err(|e| storage_error(ErrorSubject::Logs, ErrorVerb::Delete, e))
    }
}

fn encode_entry(entry: &Entry<TypeConfig>) -> Result<Vec<u8>, StorageError<NodeId>> {
    serde_json::to_vec(entry).map_err(|e| storage_error(ErrorSubject::Logs, ErrorVerb::Write, e))
}

fn decode_entry(bytes: &[u8]) -> Result<Entry<TypeConfig>, StorageError<NodeId>> {
    serde_json::from_slice(bytes).map_err(|e| storage_error(ErrorSubject::Logs, ErrorVerb::Read, e))
}

impl RaftLogReader<TypeConfig> for RocksLogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let first = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n + 1,
            Bound::Unbounded => 0,
        };
        let upper: Vec<u8> = match range.end_bound() {
            Bound::Included(&n) => entry_key_after(n),
            Bound::Excluded(&n) => entry_key(n).to_vec(),
            Bound::Unbounded => entry_key_after(u64::MAX),
        };

        let mut entries = Vec::new();
        let iter = self.db.iterator(rocksdb::IteratorMode::From(
            &entry_key(first),
            rocksdb::Direction::Forward,
        ));
        for item in iter {
            let (key, bytes) =
                item.map_err(|e| storage_error(ErrorSubject::Logs, ErrorVerb::Read, e))?;
            if key.as_ref() >= upper.as_slice() {
                break;
            }
            entries.push(decode_entry(&bytes)?);
        }
        Ok(entries)
    }
}

impl RaftLogStorage<TypeConfig> for RocksLogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let meta = *self.meta.lock();
        Ok(LogState {
            last_purged_log_id: meta.last_purged,
            last_log_id: meta.last_log_id,
        })
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        let bytes = serde_json::to_vec(vote)
            .map_err(|e| storage_error(ErrorSubject::Vote, ErrorVerb::Write, e))?;
        self.db
            .put(META_VOTE, &bytes)
            .map_err(|e| storage_error(ErrorSubject::Vote, ErrorVerb::Write, e))?;
        self.meta.lock().vote = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        Ok(self.meta.lock().vote)
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        if !entries.is_empty() {
            self.write_entries(&entries)?;
            debug!("appended {} log entries", entries.len());
        }
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        // conflict repair: drop log_id and everything after it, then
        // re-derive the last id from what survives
        self.delete_entries(log_id.index, u64::MAX)?;
        let mut meta = self.meta.lock();
        let last_purged = meta.last_purged;
        meta.last_log_id = self.last_entry()?.map(|e| e.log_id).or(last_purged);
        debug!("truncated logs from index {}", log_id.index);
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        // persist the watermark first: a crash between the two writes
        // must not resurrect purged entries as unpurged state
        let bytes = serde_json::to_vec(&log_id)
            .map_err(|e| storage_error(ErrorSubject::Logs, ErrorVerb::Write, e))?;
        self.db
            .put(META_PURGED, &bytes)
            .map_err(|e| storage_error(ErrorSubject::Logs, ErrorVerb::Write, e))?;
        self.delete_entries(0, log_id.index)?;

        let mut meta = self.meta.lock();
        meta.last_purged = Some(log_id);
        if meta.last_log_id < Some(log_id) {
            meta.last_log_id = Some(log_id);
        }
        debug!("purged logs up to index {}", log_id.index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use openraft::{CommittedLeaderId, EntryPayload};

    use super::*;
    use crate::raft::command::Command;

    fn entry(index: u64) -> Entry<TypeConfig> {
        Entry {
            log_id: LogId::new(CommittedLeaderId::new(1, 0), index),
            payload: EntryPayload::Normal(Command::RenewTtl {
                id: format!("chk:web-{}:0", index),
            }),
        }
    }

    #[test]
    fn test_entry_keys_order_like_indices_and_sort_before_meta() {
        let keys: Vec<_> = [0u64, 1, 255, 256, 70000, u64::MAX]
            .iter()
            .map(|&i| entry_key(i).to_vec())
            .collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        // meta keys must never fall inside an entry range delete
        assert!(keys.last().unwrap().as_slice() < META_VOTE);
        assert!(entry_key_after(u64::MAX).as_slice() <= META_VOTE);
    }

    #[tokio::test]
    async fn test_range_reads_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RocksLogStore::open(dir.path()).unwrap();
        let entries: Vec<_> = (1..=5).map(entry).collect();
        store.write_entries(&entries).unwrap();

        let read = store.try_get_log_entries(2..=4).await.unwrap();
        assert_eq!(read.len(), 3);
        assert_eq!(read[0].log_id.index, 2);
        assert_eq!(read[2].log_id.index, 4);

        // conflict repair drops the given index and everything after
        store.truncate(entries[2].log_id).await.unwrap();
        let rest = store.try_get_log_entries(..).await.unwrap();
        let indices: Vec<u64> = rest.iter().map(|e| e.log_id.index).collect();
        assert_eq!(indices, vec![1, 2]);
        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id.unwrap().index, 2);
    }

    #[tokio::test]
    async fn test_purge_keeps_watermark_as_last_log_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RocksLogStore::open(dir.path()).unwrap();
        let entries: Vec<_> = (1..=3).map(entry).collect();
        store.write_entries(&entries).unwrap();

        store.purge(entries[2].log_id).await.unwrap();
        assert!(store.try_get_log_entries(..).await.unwrap().is_empty());
        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_purged_log_id.unwrap().index, 3);
        // a fully purged log still reports the watermark as its end
        assert_eq!(state.last_log_id.unwrap().index, 3);

        // and recovery after reopen agrees
        drop(store);
        let mut store = RocksLogStore::open(dir.path()).unwrap();
        let state = store.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id.unwrap().index, 3);
    }

    #[tokio::test]
    async fn test_vote_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let vote = Vote::new(3, 42);
        {
            let mut store = RocksLogStore::open(dir.path()).unwrap();
            store.save_vote(&vote).await.unwrap();
        }
        let mut store = RocksLogStore::open(dir.path()).unwrap();
        assert_eq!(store.read_vote().await.unwrap(), Some(vote));
    }
}
