//! Agent lifecycle: register, drive check loops, optionally deregister
//! on shutdown.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use muster_api::{CheckDef, RegisterServiceRequest, parse_duration};

use crate::client::ServerClient;
use crate::config::AgentConfig;
use crate::probe::{self, ProbeAction, ProbeOutcome};

const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TTL: Duration = Duration::from_secs(15);

/// One managed service instance.
pub struct Agent {
    cfg: AgentConfig,
    client: ServerClient,
}

impl Agent {
    pub fn new(mut cfg: AgentConfig) -> anyhow::Result<Self> {
        cfg.ensure_defaults();
        cfg.validate()?;
        let client = ServerClient::new(&cfg.server_http)?;
        Ok(Self { cfg, client })
    }

    /// Register the instance and start one loop per created check, in
    /// request order. Registration failure is fatal to the caller.
    pub async fn start(self) -> anyhow::Result<RunningAgent> {
        let mut meta = self.cfg.meta.clone();
        meta.entry("agent".to_string())
            .or_insert_with(|| "muster".to_string());
        let request = RegisterServiceRequest {
            name: self.cfg.service.clone(),
            namespace: self.cfg.namespace.clone(),
            id: self.cfg.id.clone(),
            address: self.cfg.address.clone(),
            port: self.cfg.port,
            tags: self.cfg.tags.clone(),
            meta,
            checks: self.cfg.checks.clone(),
            weights: Default::default(),
        };
        let resp = self.client.register(&request).await?;
        info!(
            instance = %resp.instance_id,
            checks = ?resp.check_ids,
            index = resp.index,
            "registered instance"
        );

        // check ids come back in request order and pair with the defs
        let mut tasks = Vec::new();
        for (def, check_id) in self.cfg.checks.iter().zip(&resp.check_ids) {
            if let Some(task) = self.spawn_check_loop(def, check_id) {
                tasks.push(task);
            }
        }

        Ok(RunningAgent {
            cfg: self.cfg,
            client: self.client,
            tasks,
        })
    }

    fn spawn_check_loop(&self, def: &CheckDef, check_id: &str) -> Option<JoinHandle<()>> {
        let client = self.client.clone();
        let check_id = check_id.to_string();
        match def.check_type.to_lowercase().as_str() {
            "ttl" => {
                let ttl = parse_duration(&def.ttl)
                    .ok()
                    .flatten()
                    .or(self.cfg.ttl)
                    .unwrap_or(DEFAULT_TTL);
                Some(tokio::spawn(renew_loop(client, check_id, ttl)))
            }
            "http" => {
                let url = if def.path.is_empty() {
                    format!(
                        "http://{}:{}/health",
                        default_address(&self.cfg.address),
                        self.cfg.port
                    )
                } else {
                    def.path.clone()
                };
                let interval = duration_or(&def.interval, DEFAULT_PROBE_INTERVAL);
                let timeout = duration_or(&def.timeout, DEFAULT_PROBE_TIMEOUT);
                Some(tokio::spawn(http_loop(client, check_id, url, interval, timeout)))
            }
            "tcp" => {
                let target = if def.path.is_empty() {
                    format!("{}:{}", default_address(&self.cfg.address), self.cfg.port)
                } else {
                    def.path.clone()
                };
                let interval = duration_or(&def.interval, DEFAULT_PROBE_INTERVAL);
                let timeout = duration_or(&def.timeout, DEFAULT_PROBE_TIMEOUT);
                Some(tokio::spawn(tcp_loop(client, check_id, target, interval, timeout)))
            }
            "cmd" => {
                if def.path.is_empty() {
                    warn!(check = %check_id, "cmd check has no command line, skipping");
                    return None;
                }
                let interval = duration_or(&def.interval, DEFAULT_PROBE_INTERVAL);
                let timeout = duration_or(&def.timeout, DEFAULT_CMD_TIMEOUT);
                Some(tokio::spawn(cmd_loop(
                    client,
                    check_id,
                    def.path.clone(),
                    interval,
                    timeout,
                )))
            }
            other => {
                warn!(check_type = %other, "unknown check type, skipping");
                None
            }
        }
    }
}

/// An agent with its check loops running.
pub struct RunningAgent {
    cfg: AgentConfig,
    client: ServerClient,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningAgent {
    /// Stop the check loops and, when configured, deregister the
    /// instance.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        if self.cfg.deregister_on_exit {
            if let Err(e) = self
                .client
                .deregister(&self.cfg.namespace, &self.cfg.service, &self.cfg.id)
                .await
            {
                warn!(id = %self.cfg.id, error = %e, "deregister on exit failed");
            } else {
                info!(id = %self.cfg.id, "deregistered instance");
            }
        }
    }
}

/// Renewal interval for a TTL: two thirds of it, at least one second.
pub fn renew_interval(ttl: Duration) -> Duration {
    (ttl * 2 / 3).max(Duration::from_secs(1))
}

fn duration_or(raw: &str, fallback: Duration) -> Duration {
    parse_duration(raw).ok().flatten().unwrap_or(fallback)
}

fn default_address(address: &str) -> &str {
    if address.is_empty() { "127.0.0.1" } else { address }
}

async fn renew_loop(client: ServerClient, check_id: String, ttl: Duration) {
    let mut tick = tokio::time::interval(renew_interval(ttl));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first interval tick fires immediately; skip it so the check
    // stays critical until the service had one renewal period to start
    tick.tick().await;
    loop {
        tick.tick().await;
        if let Err(e) = client.check_action("pass", &check_id).await {
            // non-fatal; the next tick retries
            warn!(check = %check_id, error = %e, "ttl renewal failed");
        } else {
            debug!(check = %check_id, "renewed ttl");
        }
    }
}

async fn report(client: &ServerClient, check_id: &str, outcome: ProbeOutcome) {
    if outcome.action != ProbeAction::Pass {
        debug!(check = %check_id, output = %outcome.output, "probe output");
    }
    if let Err(e) = client.check_action(outcome.action.as_str(), check_id).await {
        warn!(check = %check_id, error = %e, "check report failed");
    }
}

async fn http_loop(
    client: ServerClient,
    check_id: String,
    url: String,
    interval: Duration,
    timeout: Duration,
) {
    let probe_client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => {
            warn!(check = %check_id, error = %e, "http probe client build failed");
            return;
        }
    };
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let outcome = probe::http_probe(&probe_client, &url).await;
        report(&client, &check_id, outcome).await;
    }
}

async fn tcp_loop(
    client: ServerClient,
    check_id: String,
    target: String,
    interval: Duration,
    timeout: Duration,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let outcome = probe::tcp_probe(&target, timeout).await;
        report(&client, &check_id, outcome).await;
    }
}

async fn cmd_loop(
    client: ServerClient,
    check_id: String,
    cmdline: String,
    interval: Duration,
    timeout: Duration,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let outcome = probe::cmd_probe(&cmdline, timeout).await;
        report(&client, &check_id, outcome).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_interval_is_two_thirds_with_floor() {
        assert_eq!(renew_interval(Duration::from_secs(15)), Duration::from_secs(10));
        assert_eq!(renew_interval(Duration::from_secs(3)), Duration::from_secs(2));
        // very small ttls still renew at most once a second
        assert_eq!(renew_interval(Duration::from_millis(300)), Duration::from_secs(1));
    }

    #[test]
    fn test_duration_or_fallback() {
        assert_eq!(duration_or("", Duration::from_secs(10)), Duration::from_secs(10));
        assert_eq!(duration_or("2s", Duration::from_secs(10)), Duration::from_secs(2));
        assert_eq!(duration_or("bogus", Duration::from_secs(10)), Duration::from_secs(10));
    }
}
