//! Configuration structs shared between `tracker-core` and the daemon's
//! TOML loader. Kept in the protocol crate (rather than the daemon
//! binary) so `tracker-core` can depend on the types without depending
//! on the daemon.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Tcp,
    Http,
}

impl Default for CheckType {
    fn default() -> Self {
        CheckType::Tcp
    }
}

/// Options recognized by `HealthProber`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProberConfig {
    /// Seconds between sweeps; `<= 0` disables the prober entirely.
    #[serde(default = "default_check_interval")]
    pub http_check_interval: i64,
    #[serde(default)]
    pub http_check_type: CheckType,
    #[serde(default = "default_check_uri")]
    pub http_check_uri: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
}

impl ProberConfig {
    pub fn enabled(&self) -> bool {
        self.http_check_interval > 0
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.http_check_interval.max(0) as u64)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            http_check_interval: default_check_interval(),
            http_check_type: CheckType::default(),
            http_check_uri: default_check_uri(),
            connect_timeout_secs: default_connect_timeout(),
            network_timeout_secs: default_network_timeout(),
        }
    }
}

fn default_check_interval() -> i64 {
    10
}
fn default_check_uri() -> String {
    "/status".to_string()
}
fn default_connect_timeout() -> u64 {
    3
}
fn default_network_timeout() -> u64 {
    5
}

/// Options recognized by `ElectionLoop`.
#[derive(Debug, Clone, Deserialize)]
pub struct ElectionConfig {
    /// Static tracker set, in order; ordinal position is the index used
    /// by `leader_index`.
    pub tracker_servers: Vec<TrackerAddr>,
    /// Addresses that identify *this* tracker within `tracker_servers`.
    #[serde(default)]
    pub local_bind_addrs: Vec<String>,
    /// The port this process listens on. Self-identification requires
    /// BOTH a local ip match and this port match — a bare ip match isn't
    /// enough to disambiguate multiple trackers co-located on one host.
    #[serde(default = "default_own_port")]
    pub own_port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

fn default_ping_interval_ms() -> u64 {
    crate::DEFAULT_PING_INTERVAL_MS
}

fn default_own_port() -> u16 {
    crate::DEFAULT_TRACKER_PORT
}

impl ElectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Whether `ip` is one of the addresses this process listens on.
    pub fn is_local(&self, ip: &str) -> bool {
        ip == "127.0.0.1"
            || ip == "::1"
            || ip == "localhost"
            || self.local_bind_addrs.iter().any(|a| a == ip)
    }

    /// Whether `peer` is this tracker's own entry in `tracker_servers`.
    /// Both the ip and the port must match: a local-ip match alone is
    /// ambiguous when multiple trackers run on the same host under
    /// different ports.
    pub fn is_self(&self, peer: &TrackerAddr) -> bool {
        self.is_local(&peer.ip) && peer.port == self.own_port
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TrackerAddr {
    pub ip: String,
    pub port: u16,
}
