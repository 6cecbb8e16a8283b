// Raft type configuration shared by the log store, state machine and
// network implementations.

use std::io::Cursor;

use openraft::{BasicNode, TokioRuntime};

use super::command::{Command, CommandResponse};

pub type NodeId = u64;

openraft::declare_raft_types!(
    /// Type configuration for the registry raft group.
    pub TypeConfig:
        D = Command,
        R = CommandResponse,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = TokioRuntime,
);

pub type Raft = openraft::Raft<TypeConfig>;
pub type RaftMetrics = openraft::RaftMetrics<NodeId, BasicNode>;
