//! TOML configuration for the daemon binary: one struct per concern,
//! each with `serde(default)` fallbacks so a minimal config file is
//! valid.

use std::path::PathBuf;

use serde::Deserialize;

use tracker_protocol::config::{ElectionConfig, ProberConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub prober: ProberConfig,
    pub election: ElectionConfig,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub status_api: StatusApiSection,
}

/// Where group membership seeds from and where snapshots land.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupSeed {
    pub group_name: String,
    pub storage_http_port: u16,
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusApiSection {
    #[serde(default = "default_status_bind")]
    pub bind: String,
}

impl Default for StatusApiSection {
    fn default() -> Self {
        Self {
            bind: default_status_bind(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("tracker-snapshot.json")
}

fn default_status_bind() -> String {
    "127.0.0.1:8080".to_string()
}
