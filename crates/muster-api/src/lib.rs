//! Request and response shapes for the agent-facing HTTP surface.
//!
//! Field names use initial capitals on the wire; durations arrive as
//! human-readable strings ("15s", "250ms") and are parsed into the
//! registry's typed check specs here, at the edge.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use muster_registry::{CheckSpec, CheckType, RegistryError, ServiceInstance, Weights};

/// Body of `PUT /v1/agent/service/register`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegisterServiceRequest {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Namespace", default)]
    pub namespace: String,
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "Port", default)]
    pub port: u16,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
    #[serde(rename = "Meta", default)]
    pub meta: HashMap<String, String>,
    #[serde(rename = "Checks", default)]
    pub checks: Vec<CheckDef>,
    #[serde(rename = "Weights", default)]
    pub weights: Weights,
}

impl RegisterServiceRequest {
    /// Instance record carried by the register command. Bookkeeping
    /// indices are assigned by the store.
    pub fn to_instance(&self) -> ServiceInstance {
        ServiceInstance {
            namespace: self.namespace.clone(),
            service: self.name.clone(),
            id: self.id.clone(),
            address: self.address.clone(),
            port: self.port,
            tags: self.tags.clone(),
            meta: self.meta.clone(),
            weights: self.weights,
            create_index: 0,
            modify_index: 0,
        }
    }
}

/// One health check definition inside a registration request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CheckDef {
    /// ttl | http | tcp | cmd
    #[serde(rename = "Type", default)]
    pub check_type: String,
    #[serde(rename = "TTL", default, skip_serializing_if = "String::is_empty")]
    pub ttl: String,
    /// Probe target: URL, host:port, or command line
    #[serde(rename = "Path", default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(rename = "Interval", default, skip_serializing_if = "String::is_empty")]
    pub interval: String,
    #[serde(rename = "Timeout", default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,
}

/// Body of `PUT /v1/agent/service/deregister`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeregisterRequest {
    #[serde(rename = "Namespace", default)]
    pub namespace: String,
    #[serde(rename = "Service", default)]
    pub service: String,
    #[serde(rename = "ID", default)]
    pub id: String,
}

/// Response of `PUT /v1/agent/service/register`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(rename = "Index")]
    pub index: u64,
    #[serde(rename = "InstanceID")]
    pub instance_id: String,
    #[serde(rename = "CheckIDs", default)]
    pub check_ids: Vec<String>,
}

/// Parse a human-readable duration string. Empty input is `None`.
pub fn parse_duration(s: &str) -> Result<Option<Duration>, RegistryError> {
    if s.is_empty() {
        return Ok(None);
    }
    humantime::parse_duration(s)
        .map(Some)
        .map_err(|e| RegistryError::Validation(format!("invalid duration {:?}: {}", s, e)))
}

/// Convert wire check definitions into typed specs, validating durations
/// and the check type.
pub fn convert_check_defs(defs: &[CheckDef]) -> Result<Vec<CheckSpec>, RegistryError> {
    let mut specs = Vec::with_capacity(defs.len());
    for def in defs {
        let check_type = CheckType::from_name(&def.check_type).ok_or_else(|| {
            RegistryError::Validation(format!("unknown check type {:?}", def.check_type))
        })?;
        specs.push(CheckSpec {
            check_type,
            ttl: parse_duration(&def.ttl)?,
            target: def.path.clone(),
            interval: parse_duration(&def.interval)?,
            timeout: parse_duration(&def.timeout)?,
        });
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_wire_shape() {
        let body = r#"{
            "Name": "web",
            "Namespace": "default",
            "ID": "web-1",
            "Address": "10.0.0.1",
            "Port": 80,
            "Tags": ["primary"],
            "Checks": [{"Type": "ttl", "TTL": "2s"}]
        }"#;
        let req: RegisterServiceRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.name, "web");
        assert_eq!(req.id, "web-1");
        assert_eq!(req.checks.len(), 1);
        // weights default to 1/1 when omitted
        assert_eq!(req.weights.passing, 1);

        let inst = req.to_instance();
        assert_eq!(inst.service, "web");
        assert_eq!(inst.create_index, 0);
    }

    #[test]
    fn test_convert_check_defs() {
        let defs = vec![
            CheckDef {
                check_type: "ttl".to_string(),
                ttl: "15s".to_string(),
                ..Default::default()
            },
            CheckDef {
                check_type: "http".to_string(),
                path: "http://127.0.0.1:80/health".to_string(),
                interval: "10s".to_string(),
                timeout: "3s".to_string(),
                ..Default::default()
            },
        ];
        let specs = convert_check_defs(&defs).unwrap();
        assert_eq!(specs[0].check_type, CheckType::Ttl);
        assert_eq!(specs[0].ttl, Some(Duration::from_secs(15)));
        assert_eq!(specs[1].check_type, CheckType::Http);
        assert_eq!(specs[1].interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_convert_rejects_unknown_type_and_bad_duration() {
        let unknown = vec![CheckDef {
            check_type: "grpc".to_string(),
            ..Default::default()
        }];
        assert!(matches!(
            convert_check_defs(&unknown),
            Err(RegistryError::Validation(_))
        ));

        let bad = vec![CheckDef {
            check_type: "ttl".to_string(),
            ttl: "soon".to_string(),
            ..Default::default()
        }];
        assert!(matches!(
            convert_check_defs(&bad),
            Err(RegistryError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_duration_empty_is_none() {
        assert_eq!(parse_duration("").unwrap(), None);
        assert_eq!(
            parse_duration("250ms").unwrap(),
            Some(Duration::from_millis(250))
        );
    }
}
