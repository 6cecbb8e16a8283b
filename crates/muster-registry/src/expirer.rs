//! TTL expiry background sweep.
//!
//! The expirer mutates local state directly, so it may only run on the
//! cluster leader; followers converge when the next replicated write
//! touches the service key. The leadership coordinator starts it on
//! gaining leadership and stops it (waiting for the in-flight sweep) on
//! stepping down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::current_timestamp_ms;
use crate::store::Store;

/// Sweep cadence.
const EXPIRE_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic sweep that downgrades overdue TTL checks to critical.
pub struct TtlExpirer;

impl TtlExpirer {
    /// Spawn the sweep loop. The returned handle stops it.
    pub fn spawn(store: Arc<Store>) -> ExpirerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(EXPIRE_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("ttl expirer started");
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let changed = store.expire_ttl_checks(current_timestamp_ms());
                        if !changed.is_empty() {
                            debug!(services = ?changed, "expired ttl checks");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("ttl expirer stopped");
        });
        ExpirerHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Handle to a running expirer. Dropping it without calling [`stop`]
/// aborts nothing; the task exits once the stop channel closes.
///
/// [`stop`]: ExpirerHandle::stop
pub struct ExpirerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ExpirerHandle {
    /// Signal the sweep loop to exit and wait for the in-flight sweep to
    /// finish. A leader stepping down must complete this before another
    /// node starts its own expirer.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::current_timestamp_ms;
    use crate::model::{CheckSpec, CheckStatus, CheckType, ServiceInstance};

    fn ttl_instance(store: &Store, id: &str, ttl: Duration) {
        let inst = ServiceInstance {
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
        };
        let spec = CheckSpec {
            check_type: CheckType::Ttl,
            ttl: Some(ttl),
            target: String::new(),
            interval: None,
            timeout: None,
        };
        store
            .register(inst, &[spec], current_timestamp_ms())
            .unwrap();
    }

    #[tokio::test]
    async fn test_expirer_downgrades_after_ttl() {
        let store = Arc::new(Store::new());
        ttl_instance(&store, "web-1", Duration::from_millis(100));
        // backdate the renewal so the very first sweep sees it overdue
        store
            .renew_ttl("chk:web-1:0", current_timestamp_ms() - 60_000)
            .unwrap();

        let handle = TtlExpirer::spawn(store.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        assert_eq!(
            store.instance_status("default", "web", "web-1"),
            Some(CheckStatus::Critical)
        );
    }

    #[tokio::test]
    async fn test_stop_waits_for_task_exit() {
        let store = Arc::new(Store::new());
        let handle = TtlExpirer::spawn(store.clone());
        handle.stop().await;
        // a fresh expirer is independent of the stopped one
        let handle = TtlExpirer::spawn(store);
        handle.stop().await;
    }
}
