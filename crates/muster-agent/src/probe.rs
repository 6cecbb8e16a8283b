//! Probe execution for http, tcp and cmd checks.
//!
//! Each probe produces an action (`pass`/`warn`/`fail`) plus an output
//! line that is logged locally; the server's check endpoints carry the
//! action only.

use std::time::Duration;

use tokio::process::Command;

/// What a probe outcome reports to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeAction {
    Pass,
    Warn,
    Fail,
}

impl ProbeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
        }
    }
}

/// Probe result: the action to report and human-readable output.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub action: ProbeAction,
    pub output: String,
}

impl ProbeOutcome {
    fn pass() -> Self {
        Self {
            action: ProbeAction::Pass,
            output: String::new(),
        }
    }

    fn fail(output: impl Into<String>) -> Self {
        Self {
            action: ProbeAction::Fail,
            output: output.into(),
        }
    }
}

/// 2xx/3xx pass, 4xx warn, anything else fails.
pub fn classify_http_status(status: u16) -> ProbeAction {
    match status {
        200..=399 => ProbeAction::Pass,
        400..=499 => ProbeAction::Warn,
        _ => ProbeAction::Fail,
    }
}

pub async fn http_probe(client: &reqwest::Client, url: &str) -> ProbeOutcome {
    match client.get(url).send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let action = classify_http_status(status);
            let output = if action == ProbeAction::Pass {
                String::new()
            } else {
                format!("status={}", status)
            };
            ProbeOutcome { action, output }
        }
        Err(e) => ProbeOutcome::fail(e.to_string()),
    }
}

pub async fn tcp_probe(target: &str, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(target)).await {
        Ok(Ok(_)) => ProbeOutcome::pass(),
        Ok(Err(e)) => ProbeOutcome::fail(e.to_string()),
        Err(_) => ProbeOutcome::fail(format!("connect {} timed out", target)),
    }
}

/// Run a command line through the shell; exit 0 passes, anything else
/// (including a timeout) fails with the combined output.
pub async fn cmd_probe(cmdline: &str, timeout: Duration) -> ProbeOutcome {
    let run = Command::new("sh").arg("-c").arg(cmdline).output();
    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            if output.status.success() {
                ProbeOutcome {
                    action: ProbeAction::Pass,
                    output: text,
                }
            } else {
                ProbeOutcome::fail(text)
            }
        }
        Ok(Err(e)) => ProbeOutcome::fail(e.to_string()),
        Err(_) => ProbeOutcome::fail(format!("command timed out after {:?}", timeout)),
    }
}
