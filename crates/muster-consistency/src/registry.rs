//! Registry façade: one surface, two write paths.
//!
//! `LocalRegistry` applies operations straight to the in-process store.
//! `RaftRegistry` wraps the same surface but routes every write through
//! the consensus log with a bounded wait, then decodes the replicated
//! response; reads and watches delegate to the local replica and
//! therefore observe only locally applied state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::warn;

use muster_registry::{
    CheckSpec, CheckStatus, CheckType, InstanceView, ListOptions, RegistryError, Result,
    ServiceInstance, Store, current_timestamp_ms,
};

use crate::raft::command::Command;
use crate::raft::node::{RaftNode, map_write_error};

/// The registry surface shared by the local-only and consensus-backed
/// implementations.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn register(
        &self,
        inst: ServiceInstance,
        specs: Vec<CheckSpec>,
    ) -> Result<(u64, Vec<String>)>;

    async fn deregister(&self, namespace: &str, service: &str, id: &str) -> Result<u64>;

    async fn renew_ttl(&self, check_id: &str) -> Result<u64>;

    async fn report_check(&self, check_id: &str, status: CheckStatus, output: &str) -> Result<u64>;

    /// Local read; never goes through consensus.
    fn list_healthy(
        &self,
        namespace: &str,
        service: &str,
        opts: &ListOptions,
    ) -> (Vec<InstanceView>, u64);

    /// Local read; never goes through consensus.
    fn list_services(&self, namespace: &str) -> (Vec<String>, u64);

    /// Local watch registration; never goes through consensus.
    fn watch_service(
        &self,
        namespace: &str,
        service: &str,
        last_index: u64,
    ) -> (u64, oneshot::Receiver<()>);

    /// Protocol type of a check on the local replica, used by the
    /// check-pass surface to decide between renew and report.
    fn check_kind(&self, check_id: &str) -> Option<CheckType>;
}

/// Registry over the in-process store alone. Used standalone and as the
/// read side of the consensus-backed registry.
#[derive(Clone)]
pub struct LocalRegistry {
    store: Arc<Store>,
}

impl LocalRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

#[async_trait]
impl Registry for LocalRegistry {
    async fn register(
        &self,
        inst: ServiceInstance,
        specs: Vec<CheckSpec>,
    ) -> Result<(u64, Vec<String>)> {
        self.store.register(inst, &specs, current_timestamp_ms())
    }

    async fn deregister(&self, namespace: &str, service: &str, id: &str) -> Result<u64> {
        self.store.deregister(namespace, service, id)
    }

    async fn renew_ttl(&self, check_id: &str) -> Result<u64> {
        self.store.renew_ttl(check_id, current_timestamp_ms())
    }

    async fn report_check(&self, check_id: &str, status: CheckStatus, output: &str) -> Result<u64> {
        self.store
            .report_check(check_id, status, output, current_timestamp_ms())
    }

    fn list_healthy(
        &self,
        namespace: &str,
        service: &str,
        opts: &ListOptions,
    ) -> (Vec<InstanceView>, u64) {
        self.store.list_healthy(namespace, service, opts)
    }

    fn list_services(&self, namespace: &str) -> (Vec<String>, u64) {
        self.store.list_services(namespace)
    }

    fn watch_service(
        &self,
        namespace: &str,
        service: &str,
        last_index: u64,
    ) -> (u64, oneshot::Receiver<()>) {
        self.store.watch_service(namespace, service, last_index)
    }

    fn check_kind(&self, check_id: &str) -> Option<CheckType> {
        self.store.check_kind(check_id)
    }
}

/// Consensus-backed registry. Writes are encoded as commands, submitted
/// to the raft log, and answered from the replicated response; reads
/// delegate to the local replica.
pub struct RaftRegistry {
    node: Arc<RaftNode>,
    local: LocalRegistry,
    write_timeout: Duration,
}

impl RaftRegistry {
    pub fn new(node: Arc<RaftNode>, local: LocalRegistry, write_timeout: Duration) -> Self {
        Self {
            node,
            local,
            write_timeout,
        }
    }

    async fn submit(&self, cmd: Command) -> Result<(u64, Vec<String>)> {
        let op = cmd.op_name();
        let write = self.node.raft().client_write(cmd);
        let response = tokio::time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| {
                warn!(op, "consensus submission timed out");
                RegistryError::Timeout
            })?
            .map_err(map_write_error)?;
        response.data.into_result()
    }
}

#[async_trait]
impl Registry for RaftRegistry {
    async fn register(
        &self,
        inst: ServiceInstance,
        specs: Vec<CheckSpec>,
    ) -> Result<(u64, Vec<String>)> {
        self.submit(Command::Register { inst, specs }).await
    }

    async fn deregister(&self, namespace: &str, service: &str, id: &str) -> Result<u64> {
        let (index, _) = self
            .submit(Command::Deregister {
                ns: namespace.to_string(),
                svc: service.to_string(),
                id: id.to_string(),
            })
            .await?;
        Ok(index)
    }

    async fn renew_ttl(&self, check_id: &str) -> Result<u64> {
        let (index, _) = self
            .submit(Command::RenewTtl {
                id: check_id.to_string(),
            })
            .await?;
        Ok(index)
    }

    async fn report_check(&self, check_id: &str, status: CheckStatus, output: &str) -> Result<u64> {
        let (index, _) = self
            .submit(Command::ReportCheck {
                id: check_id.to_string(),
                status: status.into(),
                output: output.to_string(),
            })
            .await?;
        Ok(index)
    }

    fn list_healthy(
        &self,
        namespace: &str,
        service: &str,
        opts: &ListOptions,
    ) -> (Vec<InstanceView>, u64) {
        self.local.list_healthy(namespace, service, opts)
    }

    fn list_services(&self, namespace: &str) -> (Vec<String>, u64) {
        self.local.list_services(namespace)
    }

    fn watch_service(
        &self,
        namespace: &str,
        service: &str,
        last_index: u64,
    ) -> (u64, oneshot::Receiver<()>) {
        self.local.watch_service(namespace, service, last_index)
    }

    fn check_kind(&self, check_id: &str) -> Option<CheckType> {
        self.local.check_kind(check_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> ServiceInstance {
        ServiceInstance {
            namespace: "default".to_string(),
            service: "web".to_string(),
            id: id.to_string(),
            address: "127.0.0.1".to_string(),
            port: 80,
            tags: Vec::new(),
            meta: Default::default(),
            weights: Default::default(),
            create_index: 0,
            modify_index: 0,
        }
    }

    #[tokio::test]
    async fn test_local_registry_round_trip() {
        let registry = LocalRegistry::new(Arc::new(Store::new()));
        let (index, check_ids) = registry.register(instance("web-1"), Vec::new()).await.unwrap();
        assert_eq!(index, 1);
        assert!(check_ids.is_empty());

        let (views, idx) = registry.list_healthy("default", "web", &ListOptions::default());
        assert_eq!(views.len(), 1);
        assert_eq!(idx, 1);

        let idx = registry.deregister("default", "web", "web-1").await.unwrap();
        assert_eq!(idx, 2);
    }

    #[tokio::test]
    async fn test_local_registry_watch_delegates_to_store() {
        let registry = LocalRegistry::new(Arc::new(Store::new()));
        registry.register(instance("web-1"), Vec::new()).await.unwrap();
        let (current, rx) = registry.watch_service("default", "web", 0);
        assert_eq!(current, 1);
        rx.await.expect("behind watcher fires immediately");
    }
}
