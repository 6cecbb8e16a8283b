//! Core registry entities: service instances, health checks, and the
//! status/aggregation rules shared by the store and the state machine.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Health check protocol type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    /// TTL-based passive check; clients renew via check/pass
    Ttl,
    /// HTTP GET probe
    Http,
    /// TCP connection probe
    Tcp,
    /// Command execution probe
    Cmd,
}

impl CheckType {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ttl" => Some(Self::Ttl),
            "http" => Some(Self::Http),
            "tcp" => Some(Self::Tcp),
            "cmd" => Some(Self::Cmd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ttl => "ttl",
            Self::Http => "http",
            Self::Tcp => "tcp",
            Self::Cmd => "cmd",
        }
    }
}

/// Check status. Variant order defines the aggregation ordering: an
/// instance's aggregate status is the worst (maximum) of its checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Unknown,
    Critical,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Warning => "warning",
            Self::Unknown => "unknown",
            Self::Critical => "critical",
        }
    }
}

/// Load-balancing weights recorded per instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weights {
    #[serde(rename = "Passing", default = "default_passing_weight")]
    pub passing: u32,
    #[serde(rename = "Warning", default = "default_warning_weight")]
    pub warning: u32,
}

fn default_passing_weight() -> u32 {
    1
}

fn default_warning_weight() -> u32 {
    1
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            passing: default_passing_weight(),
            warning: default_warning_weight(),
        }
    }
}

/// Immutable configuration of a health check, fixed at registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub check_type: CheckType,
    /// TTL duration; only meaningful for `Ttl` checks
    #[serde(default)]
    pub ttl: Option<Duration>,
    /// Probe target: URL for http, host:port for tcp, command line for cmd
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

/// Runtime state of a single health check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub id: String,
    pub spec: CheckSpec,
    pub status: CheckStatus,
    pub output: String,
    /// Millisecond timestamp of the last status change
    pub last_update_ms: i64,
    /// Millisecond timestamp of the last successful TTL renewal
    pub last_pass_ms: Option<i64>,
}

/// A registered instance of a service, uniquely named by
/// `(namespace, service, id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub namespace: String,
    pub service: String,
    pub id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub weights: Weights,
    /// Global index at which this instance was created
    #[serde(default)]
    pub create_index: u64,
    /// Global index of the most recent mutation of this instance
    #[serde(default)]
    pub modify_index: u64,
}

/// Filters for instance queries. `tag` and `zone` are accepted for forward
/// compatibility and currently ignored.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub passing_only: bool,
    pub tag: Option<String>,
    pub zone: Option<String>,
}

/// Client-facing projection of an instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceView {
    #[serde(rename = "Namespace")]
    pub namespace: String,
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Meta")]
    pub meta: HashMap<String, String>,
    #[serde(rename = "Weights")]
    pub weights: Weights,
}

impl From<&ServiceInstance> for InstanceView {
    fn from(inst: &ServiceInstance) -> Self {
        Self {
            namespace: inst.namespace.clone(),
            service: inst.service.clone(),
            id: inst.id.clone(),
            address: inst.address.clone(),
            port: inst.port,
            tags: inst.tags.clone(),
            meta: inst.meta.clone(),
            weights: inst.weights,
        }
    }
}

/// Full storage key for an instance: `ns/svc/id`.
pub fn full_key(namespace: &str, service: &str, id: &str) -> String {
    format!("{}/{}/{}", namespace, service, id)
}

/// Service key: `ns/svc`. Watchers and per-service indices hang off this.
pub fn service_key(namespace: &str, service: &str) -> String {
    format!("{}/{}", namespace, service)
}

/// Deterministic check id: a pure function of the instance id and the
/// 0-based position of the spec in the registration request. Replaying the
/// same command on any replica yields identical ids.
pub fn check_id(instance_id: &str, ordinal: usize) -> String {
    format!("chk:{}:{}", instance_id, ordinal)
}
