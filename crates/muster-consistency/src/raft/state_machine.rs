// Raft state machine over the in-memory registry store.
//
// Apply decodes each committed command and dispatches it to the store;
// the outcome (index progress, created check ids, or an error) is
// encoded as the entry's response. Handlers take no nondeterministic
// input beyond the payload: the wall-clock timestamps stamped into check
// records are informational and never drive apply outcomes, so replaying
// the same log on any replica produces identical ids and indices.
//
// Snapshots are JSON files in the snapshot directory, written on build
// and install and reloaded at startup; the newest two are retained.

#![allow(clippy::result_large_err)]

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine, Snapshot};
use openraft::{
    BasicNode, Entry, EntryPayload, ErrorSubject, ErrorVerb, LogId, OptionalSend, SnapshotMeta,
    StorageError, StoredMembership,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use muster_registry::{Store, StoreSnapshot, current_timestamp_ms};

use super::command::{Command, CommandResponse};
use super::types::{NodeId, TypeConfig};

fn snapshot_error(
    e: impl std::error::Error + Send + Sync + 'static,
    verb: ErrorVerb,
) -> StorageError<NodeId> {
    StorageError::from_io_error(
        ErrorSubject::Snapshot(None),
        verb,
        std::io::Error::other(e.to_string()),
    )
}

/// On-disk snapshot layout: raft metadata plus the serialized store.
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    meta: SnapshotMeta<NodeId, BasicNode>,
    data: StoreSnapshot,
}

/// Number of snapshot files retained on disk.
const SNAPSHOT_RETAIN: usize = 2;

/// State machine applying replicated registry commands to the local
/// store.
pub struct RegistryStateMachine {
    store: Arc<Store>,
    snapshot_dir: PathBuf,
    last_applied: RwLock<Option<LogId<NodeId>>>,
    last_membership: RwLock<StoredMembership<NodeId, BasicNode>>,
}

impl RegistryStateMachine {
    /// Create the state machine and, when a snapshot file exists, restore
    /// the store from the newest one so log replay resumes from its
    /// last-applied position.
    pub async fn new(store: Arc<Store>, snapshot_dir: PathBuf) -> Result<Self, StorageError<NodeId>> {
        let sm = Self {
            store,
            snapshot_dir,
            last_applied: RwLock::new(None),
            last_membership: RwLock::new(StoredMembership::default()),
        };
        if let Some(file) = sm.load_latest_snapshot()? {
            info!(
                snapshot_id = %file.meta.snapshot_id,
                index = sm_index(&file),
                "restoring store from snapshot"
            );
            sm.store.restore(file.data);
            *sm.last_applied.write().await = file.meta.last_log_id;
            *sm.last_membership.write().await = file.meta.last_membership;
        }
        Ok(sm)
    }

    fn apply_command(&self, cmd: Command) -> CommandResponse {
        let now = current_timestamp_ms();
        debug!(op = cmd.op_name(), "applying command");
        match cmd {
            Command::Register { inst, specs } => match self.store.register(inst, &specs, now) {
                Ok((index, check_ids)) => CommandResponse::registered(index, check_ids),
                Err(e) => CommandResponse::failure(&e, self.store.index()),
            },
            Command::Deregister { ns, svc, id } => {
                self.to_response(self.store.deregister(&ns, &svc, &id))
            }
            Command::RenewTtl { id } => self.to_response(self.store.renew_ttl(&id, now)),
            Command::ReportCheck { id, status, output } => {
                self.to_response(self.store.report_check(&id, status.into(), &output, now))
            }
        }
    }

    fn to_response(
        &self,
        result: Result<u64, muster_registry::RegistryError>,
    ) -> CommandResponse {
        match result {
            Ok(index) => CommandResponse::success(index),
            Err(e) => CommandResponse::failure(&e, self.store.index()),
        }
    }

    /// Parse `snapshot-{log_index}-{millis}.json` file names; newest
    /// compares greatest.
    fn snapshot_sort_key(name: &str) -> Option<(u64, u64)> {
        let rest = name.strip_prefix("snapshot-")?.strip_suffix(".json")?;
        let (index, millis) = rest.split_once('-')?;
        Some((index.parse().ok()?, millis.parse().ok()?))
    }

    fn snapshot_files(&self) -> Result<Vec<(u64, u64, PathBuf)>, StorageError<NodeId>> {
        let mut files = Vec::new();
        let entries = std::fs::read_dir(&self.snapshot_dir)
            .map_err(|e| snapshot_error(e, ErrorVerb::Read))?;
        for entry in entries {
            let entry = entry.map_err(|e| snapshot_error(e, ErrorVerb::Read))?;
            let name = entry.file_name();
            if let Some((index, millis)) = Self::snapshot_sort_key(&name.to_string_lossy()) {
                files.push((index, millis, entry.path()));
            }
        }
        files.sort();
        Ok(files)
    }

    fn load_latest_snapshot(&self) -> Result<Option<SnapshotFile>, StorageError<NodeId>> {
        if !self.snapshot_dir.exists() {
            return Ok(None);
        }
        let Some((_, _, path)) = self.snapshot_files()?.pop() else {
            return Ok(None);
        };
        let bytes = std::fs::read(&path).map_err(|e| snapshot_error(e, ErrorVerb::Read))?;
        let file = serde_json::from_slice(&bytes).map_err(|e| snapshot_error(e, ErrorVerb::Read))?;
        Ok(Some(file))
    }

    /// Write a snapshot file and drop everything but the newest
    /// `SNAPSHOT_RETAIN` images.
    fn persist_snapshot(&self, file: &SnapshotFile) -> Result<(), StorageError<NodeId>> {
        std::fs::create_dir_all(&self.snapshot_dir)
            .map_err(|e| snapshot_error(e, ErrorVerb::Write))?;
        let path = self.snapshot_dir.join(format!("{}.json", file.meta.snapshot_id));
        let bytes = serde_json::to_vec(file).map_err(|e| snapshot_error(e, ErrorVerb::Write))?;
        std::fs::write(&path, bytes).map_err(|e| snapshot_error(e, ErrorVerb::Write))?;

        let files = self.snapshot_files()?;
        if files.len() > SNAPSHOT_RETAIN {
            for (_, _, stale) in &files[..files.len() - SNAPSHOT_RETAIN] {
                let _ = std::fs::remove_file(stale);
            }
        }
        Ok(())
    }
}

fn sm_index(file: &SnapshotFile) -> u64 {
    file.data.index
}

impl RaftSnapshotBuilder<TypeConfig> for RegistryStateMachine {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let last_applied = *self.last_applied.read().await;
        let last_membership = self.last_membership.read().await.clone();

        // the store's read lock excludes concurrent writes for the copy
        let data = self.store.snapshot();

        let snapshot_id = format!(
            "snapshot-{}-{}",
            last_applied.map(|l| l.index).unwrap_or(0),
            current_timestamp_ms()
        );
        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership,
            snapshot_id,
        };

        let bytes = serde_json::to_vec(&data).map_err(|e| snapshot_error(e, ErrorVerb::Write))?;
        self.persist_snapshot(&SnapshotFile {
            meta: meta.clone(),
            data,
        })?;
        info!(snapshot_id = %meta.snapshot_id, bytes = bytes.len(), "built snapshot");

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(bytes)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for RegistryStateMachine {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>>
    {
        Ok((
            *self.last_applied.read().await,
            self.last_membership.read().await.clone(),
        ))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<CommandResponse>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut responses = Vec::new();
        for entry in entries {
            let log_id = entry.log_id;
            let response = match entry.payload {
                EntryPayload::Normal(cmd) => self.apply_command(cmd),
                EntryPayload::Membership(membership) => {
                    *self.last_membership.write().await =
                        StoredMembership::new(Some(log_id), membership);
                    CommandResponse::success(self.store.index())
                }
                EntryPayload::Blank => CommandResponse::success(self.store.index()),
            };
            *self.last_applied.write().await = Some(log_id);
            responses.push(response);
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        RegistryStateMachine {
            store: self.store.clone(),
            snapshot_dir: self.snapshot_dir.clone(),
            last_applied: RwLock::new(*self.last_applied.read().await),
            last_membership: RwLock::new(self.last_membership.read().await.clone()),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let bytes = snapshot.into_inner();
        if !bytes.is_empty() {
            // deserialize fully before touching the store: a bad image
            // must leave prior state intact
            let data: StoreSnapshot =
                serde_json::from_slice(&bytes).map_err(|e| snapshot_error(e, ErrorVerb::Read))?;
            self.persist_snapshot(&SnapshotFile {
                meta: meta.clone(),
                data: data.clone(),
            })?;
            self.store.restore(data);
        }

        *self.last_applied.write().await = meta.last_log_id;
        *self.last_membership.write().await = meta.last_membership.clone();
        info!(snapshot_id = %meta.snapshot_id, "installed snapshot");
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let Some(file) = self.load_latest_snapshot()? else {
            return Ok(None);
        };
        let bytes =
            serde_json::to_vec(&file.data).map_err(|e| snapshot_error(e, ErrorVerb::Read))?;
        Ok(Some(Snapshot {
            meta: file.meta,
            snapshot: Box::new(Cursor::new(bytes)),
        }))
    }
}
