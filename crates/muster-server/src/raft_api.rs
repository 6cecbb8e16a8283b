//! Raft peer RPC routes.
//!
//! Counterpart of the HTTP network factory: peers post JSON-encoded
//! vote/append/snapshot requests here and get the local raft runtime's
//! `Result` back, serialized as-is.

use actix_web::{Responder, Scope, web};

use muster_consistency::raft::types::{NodeId, Raft, TypeConfig};
use openraft::raft::{AppendEntriesRequest, InstallSnapshotRequest, VoteRequest};

pub fn routes() -> Scope {
    web::scope("/raft")
        .route("/vote", web::post().to(vote))
        .route("/append", web::post().to(append))
        .route("/snapshot", web::post().to(snapshot))
}

async fn vote(raft: web::Data<Raft>, req: web::Json<VoteRequest<NodeId>>) -> impl Responder {
    web::Json(raft.vote(req.into_inner()).await)
}

async fn append(
    raft: web::Data<Raft>,
    req: web::Json<AppendEntriesRequest<TypeConfig>>,
) -> impl Responder {
    web::Json(raft.append_entries(req.into_inner()).await)
}

async fn snapshot(
    raft: web::Data<Raft>,
    req: web::Json<InstallSnapshotRequest<TypeConfig>>,
) -> impl Responder {
    web::Json(raft.install_snapshot(req.into_inner()).await)
}
