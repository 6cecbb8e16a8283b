//! Leadership coordination and cluster membership admin.
//!
//! The coordinator watches the raft metrics stream and keeps the TTL
//! expirer running exactly while this node is leader: started on
//! gaining leadership, stopped (and awaited) on stepping down so a
//! handover never leaves two nodes sweeping.

use std::sync::Arc;

use actix_web::{HttpResponse, Scope, web};
use openraft::ServerState;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::info;

use muster_consistency::RaftNode;
use muster_registry::{ExpirerHandle, RegistryError, Store, TtlExpirer};

pub struct LeadershipCoordinator;

impl LeadershipCoordinator {
    /// Spawn the coordination loop. Exits when the raft runtime shuts
    /// down, stopping any running expirer on the way out.
    pub fn spawn(node: Arc<RaftNode>, store: Arc<Store>) -> JoinHandle<()> {
        let mut metrics = node.metrics();
        tokio::spawn(async move {
            let mut expirer: Option<ExpirerHandle> = None;
            loop {
                let is_leader = metrics.borrow_and_update().state == ServerState::Leader;
                match (is_leader, expirer.is_some()) {
                    (true, false) => {
                        info!("gained leadership, starting ttl expirer");
                        expirer = Some(TtlExpirer::spawn(store.clone()));
                    }
                    (false, true) => {
                        info!("lost leadership, stopping ttl expirer");
                        if let Some(handle) = expirer.take() {
                            handle.stop().await;
                        }
                    }
                    _ => {}
                }
                if metrics.changed().await.is_err() {
                    break;
                }
            }
            if let Some(handle) = expirer.take() {
                handle.stop().await;
            }
        })
    }
}

/// Body of `PUT /v1/cluster/join`.
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "Address")]
    pub address: String,
}

pub fn routes() -> Scope {
    web::scope("/v1/cluster").route("/join", web::put().to(join))
}

/// PUT /v1/cluster/join
///
/// Leader-only: adds the node as a voter unless it already is one.
async fn join(node: web::Data<Arc<RaftNode>>, body: web::Json<JoinRequest>) -> HttpResponse {
    let req = body.into_inner();
    match node.join(req.id, req.address.clone()).await {
        Ok(()) => {
            info!(node_id = req.id, address = %req.address, "node joined cluster");
            HttpResponse::Ok().finish()
        }
        Err(e @ RegistryError::NotLeader) => {
            HttpResponse::BadRequest().json(serde_json::json!({ "Error": e.to_string() }))
        }
        Err(e) => {
            HttpResponse::InternalServerError().json(serde_json::json!({ "Error": e.to_string() }))
        }
    }
}
