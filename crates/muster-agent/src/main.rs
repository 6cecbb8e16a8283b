//! muster-agent entry point.
//!
//! Config-file mode registers every service described under --config;
//! the single-service flags are the fallback. Runs until SIGINT/SIGTERM,
//! then stops the check loops and optionally deregisters.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use muster_agent::{Agent, AgentConfig, load_configs};
use muster_api::parse_duration;

#[derive(Debug, Parser)]
#[command(name = "muster-agent", about = "Registers services and drives their health checks")]
struct Args {
    /// JSON config file, or a directory of .json files
    #[arg(long, env = "MUSTER_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Server HTTP address (config files may override)
    #[arg(long, env = "MUSTER_SERVER", default_value = "http://127.0.0.1:8500")]
    server: String,

    /// Namespace (single-service mode)
    #[arg(long, default_value = "default")]
    ns: String,

    /// Service name (single-service mode)
    #[arg(long, default_value = "demo")]
    service: String,

    /// Instance id (single-service mode; generated when empty)
    #[arg(long, default_value = "")]
    id: String,

    /// Advertised address (single-service mode)
    #[arg(long, default_value = "127.0.0.1")]
    addr: String,

    /// Service port (single-service mode)
    #[arg(long, default_value_t = 800)]
    port: u16,

    /// TTL for the implicit check (single-service mode)
    #[arg(long, default_value = "15s")]
    ttl: String,

    /// Deregister on exit (config files may override)
    #[arg(long, default_value_t = true)]
    deregister: bool,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("agent failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let configs = match &args.config {
        Some(path) => {
            let configs = load_configs(path, &args.server, args.deregister)?;
            anyhow::ensure!(
                !configs.is_empty(),
                "no service configs found in {}",
                path.display()
            );
            configs
        }
        None => vec![AgentConfig {
            server_http: args.server.clone(),
            namespace: args.ns.clone(),
            service: args.service.clone(),
            id: args.id.clone(),
            address: args.addr.clone(),
            port: args.port,
            tags: Vec::new(),
            meta: HashMap::new(),
            ttl: parse_duration(&args.ttl)?,
            checks: Vec::new(),
            deregister_on_exit: args.deregister,
        }],
    };

    let mut running = Vec::with_capacity(configs.len());
    for cfg in configs {
        running.push(Agent::new(cfg)?.start().await?);
    }
    info!(services = running.len(), "agent running");

    wait_for_shutdown().await;

    info!("shutting down");
    for agent in running {
        agent.shutdown().await;
    }
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
