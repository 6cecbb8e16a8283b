//! In-memory registry store.
//!
//! All state lives behind a single read-writer lock: instance records,
//! check records, the secondary id index, the check-to-service reverse
//! index, per-service modification indices, parked watchers, and the
//! global index. A mutation's field updates, index bump, and watcher
//! wake-up therefore appear atomic to every reader.
//!
//! The global index increments by exactly one at the end of every
//! observable mutation; the enclosing service's sub-index is set to the
//! new value in the same step.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::model::{
    Check, CheckSpec, CheckStatus, CheckType, InstanceView, ListOptions, ServiceInstance,
    check_id, full_key, service_key,
};

#[derive(Clone, Debug)]
struct InstanceRecord {
    inst: ServiceInstance,
    /// Owned check ids, in registration-request order
    checks: Vec<String>,
}

#[derive(Default)]
struct StoreInner {
    /// `ns/svc/id` -> record. Ordered so prefix scans come out sorted by id.
    instances: BTreeMap<String, InstanceRecord>,
    /// check id -> check record
    checks: HashMap<String, Check>,
    /// instance id -> full keys, for id-only deregistration
    id_to_keys: HashMap<String, Vec<String>>,
    /// check id -> enclosing service key
    check_index: HashMap<String, String>,
    /// service key -> latest index at which that service changed
    svc_index: HashMap<String, u64>,
    /// service key -> parked one-shot watchers
    watchers: HashMap<String, Vec<oneshot::Sender<()>>>,
    /// global modification index
    index: u64,
}

impl StoreInner {
    /// Index-bump protocol: increment the global index, record it against
    /// the service key, then wake and discard every watcher parked on that
    /// key. Must run inside the writer lock.
    fn bump(&mut self, svc: &str) -> u64 {
        self.index += 1;
        self.svc_index.insert(svc.to_string(), self.index);
        if let Some(waiters) = self.watchers.remove(svc) {
            for tx in waiters {
                // A cancelled watch dropped its receiver; the send just
                // falls through without blocking.
                let _ = tx.send(());
            }
        }
        self.index
    }
}

/// Serialized image of the store. Instance check-id lists and the
/// check-to-service index are omitted; both are reconstructed on restore
/// from the deterministic check-id scheme.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub instances: BTreeMap<String, ServiceInstance>,
    pub checks: HashMap<String, Check>,
    pub id_to_keys: HashMap<String, Vec<String>>,
    pub svc_index: HashMap<String, u64>,
    pub index: u64,
}

/// The in-memory registry store. Cheap to share via `Arc`; every method
/// takes `&self`.
#[derive(Default)]
pub struct Store {
    inner: RwLock<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new instance or refresh an existing one.
    ///
    /// An existing `(ns, svc, id)` keeps its `create_index` and its check
    /// set untouched; only the mutable instance fields are overwritten and
    /// the returned check-id list is empty. A new instance gets one check
    /// record per spec, in request order, with deterministic ids; TTL
    /// checks start critical, all others unknown.
    pub fn register(
        &self,
        mut inst: ServiceInstance,
        specs: &[CheckSpec],
        now_ms: i64,
    ) -> Result<(u64, Vec<String>)> {
        if inst.namespace.is_empty() || inst.service.is_empty() || inst.id.is_empty() {
            return Err(RegistryError::Validation(
                "namespace, service and id are required".to_string(),
            ));
        }
        let svc = service_key(&inst.namespace, &inst.service);
        let key = full_key(&inst.namespace, &inst.service, &inst.id);

        let mut g = self.inner.write();
        let next = g.index + 1;

        if let Some(rec) = g.instances.get_mut(&key) {
            inst.create_index = rec.inst.create_index;
            inst.modify_index = next;
            rec.inst = inst;
            let idx = g.bump(&svc);
            return Ok((idx, Vec::new()));
        }

        inst.create_index = next;
        inst.modify_index = next;

        let mut check_ids = Vec::with_capacity(specs.len());
        for (ordinal, spec) in specs.iter().enumerate() {
            let cid = check_id(&inst.id, ordinal);
            let status = match spec.check_type {
                // Not observable as healthy before the first renewal
                CheckType::Ttl => CheckStatus::Critical,
                _ => CheckStatus::Unknown,
            };
            g.checks.insert(
                cid.clone(),
                Check {
                    id: cid.clone(),
                    spec: spec.clone(),
                    status,
                    output: String::new(),
                    last_update_ms: now_ms,
                    last_pass_ms: None,
                },
            );
            g.check_index.insert(cid.clone(), svc.clone());
            check_ids.push(cid);
        }

        g.id_to_keys.entry(inst.id.clone()).or_default().push(key.clone());
        g.instances.insert(
            key,
            InstanceRecord {
                inst,
                checks: check_ids.clone(),
            },
        );

        let idx = g.bump(&svc);
        Ok((idx, check_ids))
    }

    /// Remove an instance and all checks it owns.
    ///
    /// With both `namespace` and `service` given only the exact key is
    /// dropped; otherwise every key recorded for `id` is. Not-found is an
    /// error that still reports the current index.
    pub fn deregister(&self, namespace: &str, service: &str, id: &str) -> Result<u64> {
        if id.is_empty() {
            return Err(RegistryError::Validation("id is required".to_string()));
        }

        let mut g = self.inner.write();
        let keys: Vec<String> = if !namespace.is_empty() && !service.is_empty() {
            vec![full_key(namespace, service, id)]
        } else {
            g.id_to_keys.get(id).cloned().unwrap_or_default()
        };

        let mut touched: BTreeSet<String> = BTreeSet::new();
        for key in &keys {
            let Some(rec) = g.instances.remove(key) else {
                continue;
            };
            for cid in &rec.checks {
                g.checks.remove(cid);
                g.check_index.remove(cid);
            }
            touched.insert(service_key(&rec.inst.namespace, &rec.inst.service));
            if let Some(remaining) = g.id_to_keys.get_mut(id) {
                remaining.retain(|k| k != key);
                if remaining.is_empty() {
                    g.id_to_keys.remove(id);
                }
            }
        }

        if touched.is_empty() {
            return Err(RegistryError::NotFound {
                what: format!("instance {}", id),
                index: g.index,
            });
        }
        for svc in &touched {
            g.bump(svc);
        }
        Ok(g.index)
    }

    /// Renew a TTL check: status becomes passing and the renewal clock
    /// restarts. Rejects non-TTL checks.
    pub fn renew_ttl(&self, check: &str, now_ms: i64) -> Result<u64> {
        let mut g = self.inner.write();
        let current = g.index;
        let Some(chk) = g.checks.get_mut(check) else {
            return Err(RegistryError::NotFound {
                what: format!("check {}", check),
                index: current,
            });
        };
        if chk.spec.check_type != CheckType::Ttl {
            return Err(RegistryError::Validation(format!(
                "check {} is not a ttl check",
                check
            )));
        }
        chk.status = CheckStatus::Passing;
        chk.last_pass_ms = Some(now_ms);
        chk.last_update_ms = now_ms;

        let svc = g.check_index.get(check).cloned().unwrap_or_default();
        Ok(g.bump(&svc))
    }

    /// Record an externally observed check outcome. Status, output and the
    /// update timestamp are set unconditionally.
    pub fn report_check(
        &self,
        check: &str,
        status: CheckStatus,
        output: &str,
        now_ms: i64,
    ) -> Result<u64> {
        let mut g = self.inner.write();
        let current = g.index;
        let Some(chk) = g.checks.get_mut(check) else {
            return Err(RegistryError::NotFound {
                what: format!("check {}", check),
                index: current,
            });
        };
        chk.status = status;
        chk.output = output.to_string();
        chk.last_update_ms = now_ms;

        let svc = g.check_index.get(check).cloned().unwrap_or_default();
        Ok(g.bump(&svc))
    }

    /// List instances of a service, sorted ascending by id. With
    /// `passing_only`, instances whose aggregate status is not passing are
    /// filtered out. `tag` and `zone` filters are accepted and ignored.
    pub fn list_healthy(
        &self,
        namespace: &str,
        service: &str,
        opts: &ListOptions,
    ) -> (Vec<InstanceView>, u64) {
        let g = self.inner.read();
        let svc = service_key(namespace, service);
        let prefix = format!("{}/", svc);

        let mut views = Vec::new();
        for (key, rec) in g.instances.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            if opts.passing_only && aggregate_status(&g.checks, &rec.checks) != CheckStatus::Passing
            {
                continue;
            }
            views.push(InstanceView::from(&rec.inst));
        }

        let idx = g.svc_index.get(&svc).copied().unwrap_or(g.index);
        (views, idx)
    }

    /// Distinct service names under a namespace, sorted ascending.
    pub fn list_services(&self, namespace: &str) -> (Vec<String>, u64) {
        let g = self.inner.read();
        let prefix = format!("{}/", namespace);
        let mut names: BTreeSet<String> = BTreeSet::new();
        for (key, _) in g.instances.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            if let Some((name, _)) = rest.split_once('/') {
                names.insert(name.to_string());
            }
        }
        (names.into_iter().collect(), g.index)
    }

    /// Register interest in the next change of a service key.
    ///
    /// When the service has already moved past `last_index` the returned
    /// signal is fired before this call returns. Otherwise the signal is
    /// parked and the next mutation of the key fires it; watchers are
    /// one-shot and the waiter list is cleared on every wake.
    pub fn watch_service(
        &self,
        namespace: &str,
        service: &str,
        last_index: u64,
    ) -> (u64, oneshot::Receiver<()>) {
        let svc = service_key(namespace, service);
        let mut g = self.inner.write();
        let current = g.svc_index.get(&svc).copied().unwrap_or(0);
        let (tx, rx) = oneshot::channel();
        if current > last_index {
            let _ = tx.send(());
            return (current, rx);
        }
        g.watchers.entry(svc).or_default().push(tx);
        (current, rx)
    }

    /// Aggregate status of one instance; `None` when the instance is
    /// absent.
    pub fn instance_status(&self, namespace: &str, service: &str, id: &str) -> Option<CheckStatus> {
        let g = self.inner.read();
        let rec = g.instances.get(&full_key(namespace, service, id))?;
        Some(aggregate_status(&g.checks, &rec.checks))
    }

    /// Protocol type of a check, if it exists on this replica.
    pub fn check_kind(&self, check: &str) -> Option<CheckType> {
        self.inner.read().checks.get(check).map(|c| c.spec.check_type)
    }

    /// Current value of the global modification index.
    pub fn index(&self) -> u64 {
        self.inner.read().index
    }

    /// One TTL expiry sweep. Every TTL check that has been renewed at
    /// least once and whose renewal is older than its TTL transitions to
    /// critical; the transition is idempotent. One index bump per distinct
    /// changed service, after the scan. Returns the changed service keys.
    pub fn expire_ttl_checks(&self, now_ms: i64) -> Vec<String> {
        let mut g = self.inner.write();
        let mut changed: BTreeSet<String> = BTreeSet::new();

        let StoreInner {
            checks,
            check_index,
            ..
        } = &mut *g;
        for (cid, chk) in checks.iter_mut() {
            if chk.spec.check_type != CheckType::Ttl {
                continue;
            }
            let Some(ttl) = chk.spec.ttl else { continue };
            if ttl.is_zero() {
                continue;
            }
            let Some(last_pass) = chk.last_pass_ms else {
                continue;
            };
            if now_ms - last_pass > ttl.as_millis() as i64 && chk.status != CheckStatus::Critical {
                chk.status = CheckStatus::Critical;
                chk.last_update_ms = now_ms;
                if let Some(svc) = check_index.get(cid) {
                    changed.insert(svc.clone());
                }
            }
        }

        for svc in &changed {
            g.bump(svc);
        }
        if !changed.is_empty() {
            debug!(services = changed.len(), "ttl sweep downgraded expired checks");
        }
        changed.into_iter().collect()
    }

    /// Serialize the full store state. Watchers are not part of the image.
    pub fn snapshot(&self) -> StoreSnapshot {
        let g = self.inner.read();
        StoreSnapshot {
            instances: g
                .instances
                .iter()
                .map(|(k, rec)| (k.clone(), rec.inst.clone()))
                .collect(),
            checks: g.checks.clone(),
            id_to_keys: g.id_to_keys.clone(),
            svc_index: g.svc_index.clone(),
            index: g.index,
        }
    }

    /// Replace the store state from a snapshot in one atomic swap.
    ///
    /// Check-id lists and the check-to-service index are rebuilt from the
    /// deterministic id scheme: an instance's checks are `chk:{id}:{n}`
    /// for contiguous n starting at 0. Waiter lists start empty; watchers
    /// parked before the restore resolve through their dropped senders.
    pub fn restore(&self, snap: StoreSnapshot) {
        let mut instances = BTreeMap::new();
        let mut check_index = HashMap::new();
        for (key, inst) in snap.instances {
            let svc = service_key(&inst.namespace, &inst.service);
            let mut checks = Vec::new();
            loop {
                let cid = check_id(&inst.id, checks.len());
                if !snap.checks.contains_key(&cid) {
                    break;
                }
                check_index.insert(cid.clone(), svc.clone());
                checks.push(cid);
            }
            instances.insert(key, InstanceRecord { inst, checks });
        }

        let mut g = self.inner.write();
        *g = StoreInner {
            instances,
            checks: snap.checks,
            id_to_keys: snap.id_to_keys,
            check_index,
            svc_index: snap.svc_index,
            index: snap.index,
            watchers: HashMap::new(),
        };
    }
}

/// Worst-of aggregation over an instance's checks: start at passing,
/// upgrade toward worse, short-circuit on critical. No checks means
/// passing.
fn aggregate_status(checks: &HashMap<String, Check>, owned: &[String]) -> CheckStatus {
    let mut agg = CheckStatus::Passing;
    for cid in owned {
        if let Some(chk) = checks.get(cid) {
            if chk.status == CheckStatus::Critical {
                return CheckStatus::Critical;
            }
            agg = agg.max(chk.status);
        }
    }
    agg
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::current_timestamp_ms;

    fn instance(ns: &str, svc: &str, id: &str) -> ServiceInstance {
        ServiceInstance {
            namespace: ns.to_string(),
            service: svc.to_string(),
            id: id.to_string(),
            address: "127.0.0.1".to_string(),
            port: 8080,
            tags: Vec::new(),
            meta: HashMap::new(),
            weights: Default::default(),
            create_index: 0,
            modify_index: 0,
        }
    }

    fn ttl_spec(ttl: Duration) -> CheckSpec {
        CheckSpec {
            check_type: CheckType::Ttl,
            ttl: Some(ttl),
            target: String::new(),
            interval: None,
            timeout: None,
        }
    }

    fn http_spec() -> CheckSpec {
        CheckSpec {
            check_type: CheckType::Http,
            ttl: None,
            target: "http://127.0.0.1:8080/health".to_string(),
            interval: Some(Duration::from_secs(10)),
            timeout: Some(Duration::from_secs(3)),
        }
    }

    #[test]
    fn test_register_assigns_indices_and_check_ids() {
        let store = Store::new();
        let now = current_timestamp_ms();
        let (idx, ids) = store
            .register(instance("default", "web", "web-1"), &[ttl_spec(Duration::from_secs(2)), http_spec()], now)
            .unwrap();
        assert_eq!(idx, 1);
        assert_eq!(ids, vec!["chk:web-1:0", "chk:web-1:1"]);
        assert_eq!(store.index(), 1);

        // ttl starts critical, http starts unknown, aggregate is critical
        assert_eq!(
            store.instance_status("default", "web", "web-1"),
            Some(CheckStatus::Critical)
        );
    }

    #[test]
    fn test_register_rejects_missing_fields() {
        let store = Store::new();
        let now = current_timestamp_ms();
        let err = store
            .register(instance("", "web", "web-1"), &[], now)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
        // no state change, no index bump
        assert_eq!(store.index(), 0);
    }

    #[test]
    fn test_reregister_preserves_create_index_and_checks() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "w-1"), &[ttl_spec(Duration::from_secs(10)), http_spec()], now)
            .unwrap();

        let mut refreshed = instance("default", "web", "w-1");
        refreshed.address = "10.0.0.9".to_string();
        let (idx, ids) = store.register(refreshed, &[ttl_spec(Duration::from_secs(99))], now).unwrap();
        assert_eq!(idx, 2);
        assert!(ids.is_empty(), "refresh returns no check ids");

        // the original checks survive and are still renewable
        assert!(store.renew_ttl("chk:w-1:0", now).is_ok());
        // the new spec set was not reconciled in
        assert_eq!(store.check_kind("chk:w-1:1"), Some(CheckType::Http));

        let (views, _) = store.list_healthy("default", "web", &ListOptions::default());
        assert_eq!(views[0].address, "10.0.0.9");
    }

    #[test]
    fn test_indices_strictly_increase() {
        let store = Store::new();
        let now = current_timestamp_ms();
        let (i1, _) = store
            .register(instance("default", "a", "a-1"), &[], now)
            .unwrap();
        let (i2, _) = store
            .register(instance("default", "b", "b-1"), &[], now)
            .unwrap();
        let i3 = store.deregister("default", "a", "a-1").unwrap();
        assert!(i1 < i2 && i2 < i3);
        assert_eq!(store.index(), i3);
    }

    #[test]
    fn test_deregister_by_id_only() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "db", "db-2"), &[ttl_spec(Duration::from_secs(5))], now)
            .unwrap();
        let idx = store.deregister("", "", "db-2").unwrap();
        assert_eq!(idx, 2);
        let (views, _) = store.list_healthy("default", "db", &ListOptions::default());
        assert!(views.is_empty());
        // owned checks are gone too
        assert_eq!(store.check_kind("chk:db-2:0"), None);
    }

    #[test]
    fn test_deregister_missing_returns_current_index() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[], now)
            .unwrap();
        let err = store.deregister("default", "web", "nope").unwrap_err();
        match err {
            RegistryError::NotFound { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.index(), 1);
    }

    #[test]
    fn test_renew_ttl_transitions_to_passing() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[ttl_spec(Duration::from_secs(2))], now)
            .unwrap();
        assert_eq!(
            store.instance_status("default", "web", "web-1"),
            Some(CheckStatus::Critical)
        );
        let idx = store.renew_ttl("chk:web-1:0", now).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(
            store.instance_status("default", "web", "web-1"),
            Some(CheckStatus::Passing)
        );
    }

    #[test]
    fn test_renew_rejects_non_ttl_and_missing_checks() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[http_spec()], now)
            .unwrap();
        assert!(matches!(
            store.renew_ttl("chk:web-1:0", now),
            Err(RegistryError::Validation(_))
        ));
        assert!(matches!(
            store.renew_ttl("chk:ghost:0", now),
            Err(RegistryError::NotFound { .. })
        ));
        // failed renews do not move the index
        assert_eq!(store.index(), 1);
    }

    #[test]
    fn test_aggregate_worst_of() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(
                instance("default", "api", "api-1"),
                &[ttl_spec(Duration::from_secs(10)), http_spec()],
                now,
            )
            .unwrap();
        store.renew_ttl("chk:api-1:0", now).unwrap();
        store
            .report_check("chk:api-1:1", CheckStatus::Warning, "slow", now)
            .unwrap();

        assert_eq!(
            store.instance_status("default", "api", "api-1"),
            Some(CheckStatus::Warning)
        );
        let passing_only = ListOptions {
            passing_only: true,
            ..Default::default()
        };
        let (views, _) = store.list_healthy("default", "api", &passing_only);
        assert!(views.is_empty());
        let (views, _) = store.list_healthy("default", "api", &ListOptions::default());
        assert_eq!(views.len(), 1);
    }

    #[test]
    fn test_instance_without_checks_aggregates_to_passing() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[], now)
            .unwrap();
        assert_eq!(
            store.instance_status("default", "web", "web-1"),
            Some(CheckStatus::Passing)
        );
    }

    #[test]
    fn test_report_persists_output() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[http_spec()], now)
            .unwrap();
        store
            .report_check("chk:web-1:0", CheckStatus::Critical, "connection refused", now)
            .unwrap();
        // output is persisted on the record but never surfaced by queries
        let snap = store.snapshot();
        assert_eq!(snap.checks["chk:web-1:0"].output, "connection refused");
    }

    #[test]
    fn test_list_sorted_by_id() {
        let store = Store::new();
        let now = current_timestamp_ms();
        for id in ["db-3", "db-1", "db-2"] {
            store
                .register(instance("default", "db", id), &[], now)
                .unwrap();
        }
        let (views, _) = store.list_healthy("default", "db", &ListOptions::default());
        let ids: Vec<&str> = views.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["db-1", "db-2", "db-3"]);
    }

    #[test]
    fn test_list_services_distinct_sorted() {
        let store = Store::new();
        let now = current_timestamp_ms();
        for (svc, id) in [("web", "w-1"), ("db", "d-1"), ("web", "w-2")] {
            store
                .register(instance("default", svc, id), &[], now)
                .unwrap();
        }
        store
            .register(instance("other", "cache", "c-1"), &[], now)
            .unwrap();
        let (names, idx) = store.list_services("default");
        assert_eq!(names, vec!["db", "web"]);
        assert_eq!(idx, store.index());
    }

    #[test]
    fn test_list_index_falls_back_to_global() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "w-1"), &[], now)
            .unwrap();
        // a service key never touched reports the global index
        let (views, idx) = store.list_healthy("default", "ghost", &ListOptions::default());
        assert!(views.is_empty());
        assert_eq!(idx, 1);
    }

    #[tokio::test]
    async fn test_watch_fires_on_mutation() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[], now)
            .unwrap();

        let (current, rx) = store.watch_service("default", "web", store.index());
        assert_eq!(current, 1);
        store
            .register(instance("default", "web", "web-2"), &[], now)
            .unwrap();
        rx.await.expect("watcher woken by mutation");

        let (_, idx) = store.list_healthy("default", "web", &ListOptions::default());
        assert_eq!(idx, current + 1);
    }

    #[tokio::test]
    async fn test_watch_fires_immediately_when_behind() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[], now)
            .unwrap();
        let (current, rx) = store.watch_service("default", "web", 0);
        assert_eq!(current, 1);
        rx.await.expect("already fired");
    }

    #[tokio::test]
    async fn test_watchers_are_one_shot_and_scoped_to_service() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[], now)
            .unwrap();
        store
            .register(instance("default", "db", "db-1"), &[], now)
            .unwrap();

        let (_, web_rx) = store.watch_service("default", "web", store.index());
        let (_, mut db_rx) = store.watch_service("default", "db", store.index());

        store
            .register(instance("default", "web", "web-2"), &[], now)
            .unwrap();
        web_rx.await.expect("web watcher woken");
        assert!(db_rx.try_recv().is_err(), "db watcher must stay parked");
    }

    #[test]
    fn test_dropped_watcher_does_not_block_mutations() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[], now)
            .unwrap();
        let (_, rx) = store.watch_service("default", "web", store.index());
        drop(rx);
        // wake-up of the cancelled watcher must be a no-op
        store
            .register(instance("default", "web", "web-2"), &[], now)
            .unwrap();
        assert_eq!(store.index(), 3);
    }

    #[test]
    fn test_expire_downgrades_overdue_ttl_checks() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[ttl_spec(Duration::from_secs(2))], now)
            .unwrap();
        store.renew_ttl("chk:web-1:0", now).unwrap();
        let renewed_at = store.index();

        // not yet overdue
        assert!(store.expire_ttl_checks(now + 1_000).is_empty());
        assert_eq!(store.index(), renewed_at);

        let changed = store.expire_ttl_checks(now + 3_000);
        assert_eq!(changed, vec!["default/web"]);
        assert_eq!(store.index(), renewed_at + 1);
        assert_eq!(
            store.instance_status("default", "web", "web-1"),
            Some(CheckStatus::Critical)
        );

        // idempotent: a second sweep sees nothing to do and bumps nothing
        assert!(store.expire_ttl_checks(now + 10_000).is_empty());
        assert_eq!(store.index(), renewed_at + 1);
    }

    #[test]
    fn test_expire_skips_never_renewed_checks() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[ttl_spec(Duration::from_secs(1))], now)
            .unwrap();
        // critical from birth but never renewed: the sweep leaves it alone
        assert!(store.expire_ttl_checks(now + 60_000).is_empty());
    }

    #[test]
    fn test_expire_bumps_once_per_service() {
        let store = Store::new();
        let now = current_timestamp_ms();
        for id in ["w-1", "w-2"] {
            store
                .register(instance("default", "web", id), &[ttl_spec(Duration::from_secs(1))], now)
                .unwrap();
            store.renew_ttl(&check_id(id, 0), now).unwrap();
        }
        store
            .register(instance("default", "db", "d-1"), &[ttl_spec(Duration::from_secs(1))], now)
            .unwrap();
        store.renew_ttl("chk:d-1:0", now).unwrap();
        let before = store.index();

        let changed = store.expire_ttl_checks(now + 5_000);
        assert_eq!(changed, vec!["default/db", "default/web"]);
        // two distinct services changed: exactly two bumps
        assert_eq!(store.index(), before + 2);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let store = Store::new();
        let now = current_timestamp_ms();
        for i in 0..10 {
            let id = format!("web-{}", i);
            store
                .register(instance("default", "web", &id), &[ttl_spec(Duration::from_secs(30))], now)
                .unwrap();
            store.renew_ttl(&check_id(&id, 0), now).unwrap();
        }
        let snap = store.snapshot();
        let encoded = serde_json::to_vec(&snap).unwrap();

        let restored = Store::new();
        restored.restore(serde_json::from_slice(&encoded).unwrap());

        assert_eq!(restored.index(), store.index());
        let (views, idx) = restored.list_healthy(
            "default",
            "web",
            &ListOptions {
                passing_only: true,
                ..Default::default()
            },
        );
        assert_eq!(views.len(), 10);
        assert_eq!(idx, store.index());

        // rebuilt indices keep mutations working: renew and expire still
        // resolve the enclosing service
        let next = restored.renew_ttl("chk:web-3:0", now).unwrap();
        assert_eq!(next, store.index() + 1);
        let (_, idx) = restored.list_healthy("default", "web", &ListOptions::default());
        assert_eq!(idx, next);
    }

    #[test]
    fn test_restore_preserves_check_timestamps() {
        let store = Store::new();
        let now = current_timestamp_ms();
        store
            .register(instance("default", "web", "web-1"), &[ttl_spec(Duration::from_secs(5))], now)
            .unwrap();
        store.renew_ttl("chk:web-1:0", now).unwrap();

        let restored = Store::new();
        restored.restore(store.snapshot());
        let snap = restored.snapshot();
        let chk = &snap.checks["chk:web-1:0"];
        assert_eq!(chk.last_pass_ms, Some(now));
        assert_eq!(chk.last_update_ms, now);
    }
}
