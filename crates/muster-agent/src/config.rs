//! Agent configuration: single-service flags or JSON config files.
//!
//! A config path is either one JSON file or a directory of `.json`
//! files. Each file holds either an aggregate
//! `{server, deregister_on_exit, services: [...]}` or a bare
//! single-service object.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use muster_api::CheckDef;

/// Effective configuration of one managed service instance.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Server base URL, e.g. http://127.0.0.1:8500
    pub server_http: String,
    pub namespace: String,
    pub service: String,
    /// Instance id; generated as `service-hostname-port` when empty
    pub id: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,
    /// Shorthand: adds a TTL check when none is declared in `checks`
    pub ttl: Option<Duration>,
    pub checks: Vec<CheckDef>,
    /// Deregister the instance on clean shutdown
    pub deregister_on_exit: bool,
}

impl AgentConfig {
    /// Fill derived fields: the generated instance id and the implicit
    /// TTL check.
    pub fn ensure_defaults(&mut self) {
        if self.id.is_empty() {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string());
            self.id = format!("{}-{}-{}", self.service, host, self.port);
        }
        let has_ttl = self
            .checks
            .iter()
            .any(|c| c.check_type.eq_ignore_ascii_case("ttl"));
        if !has_ttl && let Some(ttl) = self.ttl {
            self.checks.push(CheckDef {
                check_type: "ttl".to_string(),
                ttl: humantime::format_duration(ttl).to_string(),
                ..Default::default()
            });
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.server_http.is_empty(), "server address is required");
        anyhow::ensure!(
            !self.namespace.is_empty() && !self.service.is_empty(),
            "namespace and service are required"
        );
        Ok(())
    }
}

/// Aggregate config file: one server, many services.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: String,
    #[serde(default)]
    deregister_on_exit: bool,
    #[serde(default)]
    services: Vec<FileService>,
}

/// One service entry in a config file.
#[derive(Debug, Default, Deserialize)]
struct FileService {
    #[serde(default, rename = "ns")]
    namespace: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    id: String,
    #[serde(default, alias = "addr")]
    address: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    meta: HashMap<String, String>,
    #[serde(default)]
    checks: Vec<CheckDef>,
}

impl FileService {
    fn into_config(self, server: &str, deregister: bool) -> AgentConfig {
        AgentConfig {
            server_http: server.to_string(),
            namespace: if self.namespace.is_empty() {
                "default".to_string()
            } else {
                self.namespace
            },
            service: self.service,
            id: self.id,
            address: self.address,
            port: self.port,
            tags: self.tags,
            meta: self.meta,
            ttl: None,
            checks: self.checks,
            deregister_on_exit: deregister,
        }
    }
}

/// Load service configs from a JSON file or every `.json` file in a
/// directory.
pub fn load_configs(
    path: &Path,
    default_server: &str,
    default_deregister: bool,
) -> anyhow::Result<Vec<AgentConfig>> {
    let meta = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let files: Vec<std::path::PathBuf> = if meta.is_dir() {
        let mut files: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
            })
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut configs = Vec::new();
    for file in files {
        let mut loaded = load_file(&file, default_server, default_deregister)
            .with_context(|| format!("load {}", file.display()))?;
        configs.append(&mut loaded);
    }
    Ok(configs)
}

fn load_file(
    path: &Path,
    default_server: &str,
    default_deregister: bool,
) -> anyhow::Result<Vec<AgentConfig>> {
    let bytes = std::fs::read(path)?;

    // aggregate form first; a bare service object has neither `server`
    // nor `services`
    if let Ok(fc) = serde_json::from_slice::<FileConfig>(&bytes)
        && (!fc.services.is_empty() || !fc.server.is_empty())
    {
        let server = if fc.server.is_empty() {
            default_server
        } else {
            &fc.server
        };
        let deregister = fc.deregister_on_exit || default_deregister;
        return Ok(fc
            .services
            .into_iter()
            .map(|s| s.into_config(server, deregister))
            .collect());
    }

    let service: FileService =
        serde_json::from_slice(&bytes).context("unsupported config structure")?;
    Ok(vec![service.into_config(default_server, default_deregister)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("services.json");
        std::fs::write(
            &file,
            r#"{
                "server": "http://10.0.0.5:8500",
                "deregister_on_exit": true,
                "services": [
                    {"ns": "default", "service": "web", "id": "web-1", "addr": "10.0.0.1", "port": 80,
                     "checks": [{"Type": "ttl", "TTL": "15s"}]},
                    {"service": "db", "port": 5432}
                ]
            }"#,
        )
        .unwrap();

        let configs = load_configs(&file, "http://127.0.0.1:8500", false).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].server_http, "http://10.0.0.5:8500");
        assert_eq!(configs[0].address, "10.0.0.1");
        assert!(configs[0].deregister_on_exit);
        assert_eq!(configs[0].checks[0].ttl, "15s");
        // missing namespace falls back to default
        assert_eq!(configs[1].namespace, "default");
    }

    #[test]
    fn test_bare_service_file_and_directory_scan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"ns": "prod", "service": "cache", "id": "cache-1", "port": 6379}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{"services": [{"service": "web", "port": 80}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not json").unwrap();

        let configs = load_configs(dir.path(), "http://127.0.0.1:8500", true).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].namespace, "prod");
        assert_eq!(configs[0].server_http, "http://127.0.0.1:8500");
        assert!(configs[0].deregister_on_exit);
    }

    #[test]
    fn test_ensure_defaults_generates_id_and_implicit_ttl() {
        let mut cfg = AgentConfig {
            server_http: "http://127.0.0.1:8500".to_string(),
            namespace: "default".to_string(),
            service: "web".to_string(),
            id: String::new(),
            address: "127.0.0.1".to_string(),
            port: 80,
            tags: Vec::new(),
            meta: HashMap::new(),
            ttl: Some(Duration::from_secs(15)),
            checks: Vec::new(),
            deregister_on_exit: false,
        };
        cfg.ensure_defaults();
        assert!(cfg.id.starts_with("web-"));
        assert!(cfg.id.ends_with("-80"));
        assert_eq!(cfg.checks.len(), 1);
        assert_eq!(cfg.checks[0].check_type, "ttl");
        assert_eq!(cfg.checks[0].ttl, "15s");

        // declared ttl checks suppress the implicit one
        cfg.ensure_defaults();
        assert_eq!(cfg.checks.len(), 1);
    }

    #[test]
    fn test_validate_requires_server_and_service() {
        let cfg = AgentConfig {
            server_http: String::new(),
            namespace: "default".to_string(),
            service: "web".to_string(),
            id: "web-1".to_string(),
            address: String::new(),
            port: 0,
            tags: Vec::new(),
            meta: HashMap::new(),
            ttl: None,
            checks: Vec::new(),
            deregister_on_exit: false,
        };
        assert!(cfg.validate().is_err());
    }
}
