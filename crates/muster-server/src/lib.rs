//! muster cluster server.
//!
//! Mounts the agent/catalog/health HTTP surface over a [`Registry`],
//! the raft peer RPC routes, and the cluster admin surface; coordinates
//! leader-only background work.

use std::sync::Arc;

use muster_consistency::Registry;

pub mod api;
pub mod cluster;
pub mod raft_api;
pub mod startup;

/// Shared handler state: the registry the HTTP surface serves.
pub struct AppState {
    pub registry: Arc<dyn Registry>,
}
