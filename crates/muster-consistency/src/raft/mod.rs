// Raft consensus module for the muster cluster
// Provides linearizable write ordering for the service registry

pub mod command;
pub mod config;
pub mod log_store;
pub mod network;
pub mod node;
pub mod state_machine;
pub mod types;

pub use command::{Command, CommandResponse, WireStatus};
pub use config::RaftConfig;
pub use log_store::RocksLogStore;
pub use network::HttpNetworkFactory;
pub use node::RaftNode;
pub use state_machine::RegistryStateMachine;
pub use types::{NodeId, Raft, TypeConfig};
