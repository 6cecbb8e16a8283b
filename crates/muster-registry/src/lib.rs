//! Service registry core: data model, in-memory store with modification
//! indices and watch support, and the TTL expiry sweep.

pub mod error;
pub mod expirer;
pub mod model;
pub mod store;

pub use error::{RegistryError, Result};
pub use expirer::{ExpirerHandle, TtlExpirer};
pub use model::{
    Check, CheckSpec, CheckStatus, CheckType, InstanceView, ListOptions, ServiceInstance, Weights,
    check_id, full_key, service_key,
};
pub use store::{Store, StoreSnapshot};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
