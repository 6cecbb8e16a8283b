//! Sidecar agent for the muster registry.
//!
//! Registers one or more service instances against a server, then keeps
//! their checks alive: TTL renewals on a fraction of the TTL, and
//! http/tcp/cmd probes whose outcomes become status reports. Probe and
//! renewal failures are logged and retried on the next tick, never
//! fatal.

pub mod agent;
pub mod client;
pub mod config;
pub mod probe;

pub use agent::Agent;
pub use client::ServerClient;
pub use config::{AgentConfig, load_configs};
