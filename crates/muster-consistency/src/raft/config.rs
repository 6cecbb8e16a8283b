// Raft configuration and on-disk layout for the consensus backend.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the raft consensus backend.
#[derive(Clone, Debug)]
pub struct RaftConfig {
    /// Election timeout in milliseconds; a follower that hears nothing
    /// from the leader within this window starts an election
    pub election_timeout_ms: u64,

    /// Leader heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Number of log entries since the last snapshot before a new one is
    /// taken
    pub snapshot_threshold: u64,

    /// Bound on a single write submission, façade-side
    pub write_timeout_ms: u64,

    /// Data directory holding the log store and snapshot files
    pub data_dir: PathBuf,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_ms: 1500,
            heartbeat_interval_ms: 500,
            snapshot_threshold: 8192,
            write_timeout_ms: 5000,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl RaftConfig {
    /// Bound on a single write submission as a Duration.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Directory of the RocksDB log store.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Directory of the file-based snapshot store.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Ensure all data directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.log_dir())?;
        std::fs::create_dir_all(self.snapshot_dir())?;
        Ok(())
    }

    /// Convert to the openraft runtime configuration.
    pub fn to_openraft_config(&self) -> openraft::Config {
        openraft::Config {
            cluster_name: "muster".to_string(),
            election_timeout_min: self.election_timeout_ms,
            election_timeout_max: self.election_timeout_ms * 2,
            heartbeat_interval: self.heartbeat_interval_ms,
            snapshot_policy: openraft::SnapshotPolicy::LogsSinceLast(self.snapshot_threshold),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RaftConfig::default();
        assert_eq!(config.write_timeout(), Duration::from_millis(5000));
        assert_eq!(config.snapshot_threshold, 8192);
    }

    #[test]
    fn test_directory_layout() {
        let config = RaftConfig {
            data_dir: PathBuf::from("/tmp/muster"),
            ..Default::default()
        };
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/muster/logs"));
        assert_eq!(config.snapshot_dir(), PathBuf::from("/tmp/muster/snapshots"));
    }

    #[test]
    fn test_to_openraft_config() {
        let config = RaftConfig::default().to_openraft_config();
        assert_eq!(config.cluster_name, "muster");
        assert_eq!(config.election_timeout_max, 3000);
        assert_eq!(config.heartbeat_interval, 500);
    }
}
