// Replicated write commands and their responses.
// Every write crosses the consensus boundary as a self-describing
// envelope {"op": <name>, "data": <payload>}; responses encode the index
// progress plus an optional error so followers and the submitter decode
// identically.

use serde::{Deserialize, Serialize};

use muster_registry::{CheckSpec, CheckStatus, RegistryError, ServiceInstance};

/// All operations that go through consensus.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum Command {
    /// Register or refresh a service instance with its check specs
    Register {
        inst: ServiceInstance,
        specs: Vec<CheckSpec>,
    },

    /// Remove an instance; empty ns/svc resolves by id alone
    Deregister { ns: String, svc: String, id: String },

    /// Renew a TTL check
    RenewTtl { id: String },

    /// Record an externally observed check outcome
    ReportCheck {
        id: String,
        status: WireStatus,
        output: String,
    },
}

impl Command {
    /// Operation name for logging.
    pub fn op_name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Deregister { .. } => "deregister",
            Command::RenewTtl { .. } => "renew_ttl",
            Command::ReportCheck { .. } => "report_check",
        }
    }
}

/// Check status as carried in command payloads. The set is closed; any
/// unrecognized string decodes to `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireStatus {
    Pass,
    Warn,
    Fail,
    #[serde(other)]
    Unknown,
}

impl From<WireStatus> for CheckStatus {
    fn from(s: WireStatus) -> Self {
        match s {
            WireStatus::Pass => CheckStatus::Passing,
            WireStatus::Warn => CheckStatus::Warning,
            WireStatus::Fail => CheckStatus::Critical,
            WireStatus::Unknown => CheckStatus::Unknown,
        }
    }
}

impl From<CheckStatus> for WireStatus {
    fn from(s: CheckStatus) -> Self {
        match s {
            CheckStatus::Passing => WireStatus::Pass,
            CheckStatus::Warning => WireStatus::Warn,
            CheckStatus::Critical => WireStatus::Fail,
            CheckStatus::Unknown => WireStatus::Unknown,
        }
    }
}

const NOT_FOUND_SUFFIX: &str = " not found";

/// Outcome of one applied command. An absent `err` means success;
/// `check_ids` is populated only by a register that created checks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommandResponse {
    pub index: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl CommandResponse {
    pub fn success(index: u64) -> Self {
        Self {
            index,
            check_ids: Vec::new(),
            err: None,
        }
    }

    pub fn registered(index: u64, check_ids: Vec<String>) -> Self {
        Self {
            index,
            check_ids,
            err: None,
        }
    }

    /// Encode a registry error together with whatever index progress was
    /// made. Error text is the error's display form; not-found keeps its
    /// audit index through `RegistryError::index`.
    pub fn failure(err: &RegistryError, fallback_index: u64) -> Self {
        Self {
            index: err.index().unwrap_or(fallback_index),
            check_ids: Vec::new(),
            err: Some(err.to_string()),
        }
    }

    /// Decode back into the registry's typed result. Not-found errors are
    /// recognized by their display form and keep the audit index.
    pub fn into_result(self) -> Result<(u64, Vec<String>), RegistryError> {
        match self.err {
            None => Ok((self.index, self.check_ids)),
            Some(msg) => {
                if let Some(what) = msg.strip_suffix(NOT_FOUND_SUFFIX) {
                    Err(RegistryError::NotFound {
                        what: what.to_string(),
                        index: self.index,
                    })
                } else {
                    Err(RegistryError::Validation(msg))
                }
            }
        }
    }
}
