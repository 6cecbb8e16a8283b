//! muster-server entry point.
//!
//! Assembles the store, raft node, leadership coordinator and HTTP
//! listener. The listener serves the public agent/catalog/health
//! surface, the cluster admin surface, and the raft peer RPCs.

use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger, web};
use clap::Parser;
use tracing::info;

use muster_consistency::{LocalRegistry, RaftConfig, RaftNode, RaftRegistry, Registry};
use muster_registry::Store;
use muster_server::{AppState, api, cluster, raft_api, startup};

#[derive(Debug, Parser)]
#[command(name = "muster-server", about = "Replicated service registry server")]
struct Args {
    /// Unique raft node id
    #[arg(long, env = "MUSTER_NODE_ID", default_value_t = 1)]
    node_id: u64,

    /// HTTP listen address
    #[arg(long, env = "MUSTER_HTTP_ADDR", default_value = "127.0.0.1:8500")]
    http_addr: String,

    /// Address peers use to reach this node; defaults to the listen
    /// address
    #[arg(long, env = "MUSTER_ADVERTISE_ADDR")]
    advertise_addr: Option<String>,

    /// Data directory for the raft log and snapshots
    #[arg(long, env = "MUSTER_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Bootstrap a single-voter cluster on first start
    #[arg(long, env = "MUSTER_BOOTSTRAP", default_value_t = true)]
    bootstrap: bool,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    startup::init_logging();
    let args = Args::parse();

    let store = Arc::new(Store::new());
    let config = RaftConfig {
        data_dir: args.data_dir.clone(),
        ..Default::default()
    };
    let advertise = args
        .advertise_addr
        .clone()
        .unwrap_or_else(|| args.http_addr.clone());

    let node = Arc::new(
        RaftNode::new(args.node_id, advertise, config.clone(), store.clone()).await?,
    );
    if args.bootstrap {
        node.bootstrap_single().await?;
    }

    let coordinator = cluster::LeadershipCoordinator::spawn(node.clone(), store.clone());

    let registry: Arc<dyn Registry> = Arc::new(RaftRegistry::new(
        node.clone(),
        LocalRegistry::new(store.clone()),
        config.write_timeout(),
    ));
    let state = web::Data::new(AppState { registry });
    let raft = web::Data::new(node.raft().clone());
    let node_data = web::Data::new(node.clone());

    info!(addr = %args.http_addr, node_id = args.node_id, "http server listening");
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .app_data(raft.clone())
            .app_data(node_data.clone())
            // the cluster scope shares the /v1 prefix; register it first
            // so its longer prefix wins
            .service(cluster::routes())
            .service(api::routes())
            .service(raft_api::routes())
    })
    .bind(&args.http_addr)?
    .run()
    .await?;

    // the listener exits on SIGINT/SIGTERM; wind down leader-only work
    coordinator.abort();
    info!("server stopped");
    Ok(())
}
