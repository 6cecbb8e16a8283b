//! Consensus layer for the muster registry.
//!
//! Writes are encoded as self-describing commands, replicated through an
//! openraft log backed by RocksDB, and applied deterministically to the
//! in-memory store on every replica. Reads bypass consensus and observe
//! the local replica.

pub mod raft;
pub mod registry;

pub use raft::command::{Command, CommandResponse, WireStatus};
pub use raft::config::RaftConfig;
pub use raft::node::RaftNode;
pub use raft::types::{NodeId, Raft, TypeConfig};
pub use registry::{LocalRegistry, RaftRegistry, Registry};
