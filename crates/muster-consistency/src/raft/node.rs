// Raft node assembly: storage, state machine, network and the openraft
// runtime, plus cluster bootstrap and membership operations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use openraft::error::{ClientWriteError, RaftError};
use openraft::{BasicNode, ChangeMembers};
use tokio::sync::watch;
use tracing::info;

use muster_registry::{RegistryError, Store};

use super::config::RaftConfig;
use super::log_store::RocksLogStore;
use super::network::HttpNetworkFactory;
use super::state_machine::RegistryStateMachine;
use super::types::{NodeId, Raft, RaftMetrics};

/// A running raft node bound to a local registry store.
pub struct RaftNode {
    raft: Raft,
    node_id: NodeId,
    addr: String,
}

impl RaftNode {
    /// Build the storage stack and start the raft runtime. The store is
    /// shared with the caller: the state machine mutates it, local reads
    /// observe it directly.
    pub async fn new(
        node_id: NodeId,
        addr: String,
        config: RaftConfig,
        store: Arc<Store>,
    ) -> anyhow::Result<Self> {
        config.ensure_dirs()?;

        let log_store = RocksLogStore::open(config.log_dir())
            .map_err(|e| anyhow::anyhow!("open log store: {}", e))?;
        let state_machine = RegistryStateMachine::new(store, config.snapshot_dir())
            .await
            .map_err(|e| anyhow::anyhow!("restore state machine: {}", e))?;

        let raft_config = Arc::new(config.to_openraft_config().validate()?);
        let raft = Raft::new(
            node_id,
            raft_config,
            HttpNetworkFactory::new(),
            log_store,
            state_machine,
        )
        .await?;

        info!(node_id, addr = %addr, "raft node started");
        Ok(Self {
            raft,
            node_id,
            addr,
        })
    }

    pub fn raft(&self) -> &Raft {
        &self.raft
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Bootstrap a single-voter cluster on first start. Existing raft
    /// state short-circuits, so restarts and already-joined nodes are
    /// no-ops.
    pub async fn bootstrap_single(&self) -> anyhow::Result<()> {
        if self.raft.is_initialized().await? {
            info!(node_id = self.node_id, "cluster already initialized");
            return Ok(());
        }
        let mut members = BTreeMap::new();
        members.insert(
            self.node_id,
            BasicNode {
                addr: self.addr.clone(),
            },
        );
        self.raft.initialize(members).await?;
        info!(node_id = self.node_id, "bootstrapped single-voter cluster");
        Ok(())
    }

    /// Whether this node currently believes it is the leader.
    pub fn is_leader(&self) -> bool {
        let metrics = self.raft.metrics().borrow().clone();
        metrics.current_leader == Some(self.node_id)
    }

    /// Watch stream of raft runtime metrics; the leadership coordinator
    /// subscribes to this.
    pub fn metrics(&self) -> watch::Receiver<RaftMetrics> {
        self.raft.metrics()
    }

    /// Admit a node to the cluster. Already-voting nodes are a no-op;
    /// otherwise the node is added as a learner and promoted to voter
    /// once, in a single membership change. Rejected with `NotLeader`
    /// when invoked on a follower.
    pub async fn join(&self, node_id: NodeId, addr: String) -> Result<(), RegistryError> {
        let metrics = self.raft.metrics().borrow().clone();
        let voters: BTreeSet<NodeId> = metrics
            .membership_config
            .membership()
            .voter_ids()
            .collect();
        if voters.contains(&node_id) {
            info!(node_id, "join: node is already a voter");
            return Ok(());
        }

        self.raft
            .add_learner(node_id, BasicNode { addr }, true)
            .await
            .map_err(map_write_error)?;

        let mut new_voters = voters;
        new_voters.insert(node_id);
        self.raft
            .change_membership(ChangeMembers::ReplaceAllVoters(new_voters), false)
            .await
            .map_err(map_write_error)?;

        info!(node_id, "join: node promoted to voter");
        Ok(())
    }
}

/// Map raft write-path errors onto the registry's error kinds.
pub(crate) fn map_write_error(
    e: RaftError<NodeId, ClientWriteError<NodeId, BasicNode>>,
) -> RegistryError {
    match e {
        RaftError::APIError(ClientWriteError::ForwardToLeader(_)) => RegistryError::NotLeader,
        RaftError::APIError(other) => RegistryError::Replication(other.to_string()),
        RaftError::Fatal(fatal) => RegistryError::Replication(fatal.to_string()),
    }
}
