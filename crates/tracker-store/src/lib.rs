//! Owns the group/storage membership tables that `tracker-core` reads and
//! partially mutates. In the system this core is extracted from, these
//! tables are owned by a separate shared-memory module; here they are
//! owned by an in-memory store with JSON snapshot persistence, reached
//! through the `MembershipStore` trait so `tracker-core` never depends on
//! the concrete storage backend.

mod memory;

pub use memory::InMemoryStore;

use serde::{Deserialize, Serialize};
use tracker_protocol::failure_counter::FailureCounter;

/// A storage server within a group, identified by its IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageServer {
    pub ip: String,
    #[serde(skip, default)]
    pub counter: FailureCounter,
}

impl StorageServer {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            counter: FailureCounter::new(),
        }
    }
}

/// A group of storage servers sharing an HTTP port and a trunk-server
/// role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub group_name: String,
    pub all_servers: Vec<StorageServer>,
    /// IPs of servers currently considered active members of the group.
    pub active_servers: Vec<String>,
    /// The published subset of `active_servers` eligible for HTTP
    /// traffic; `http_servers[..http_server_count]` is always valid.
    pub http_servers: Vec<String>,
    pub http_server_count: usize,
    pub storage_http_port: u16,
    pub last_trunk_server_id: String,
    pub trunk_server: Option<String>,
}

impl Group {
    pub fn new(group_name: impl Into<String>, storage_http_port: u16) -> Self {
        Self {
            group_name: group_name.into(),
            all_servers: Vec::new(),
            active_servers: Vec::new(),
            http_servers: Vec::new(),
            http_server_count: 0,
            storage_http_port,
            last_trunk_server_id: String::new(),
            trunk_server: None,
        }
    }

    pub fn add_server(&mut self, ip: impl Into<String>) {
        let ip = ip.into();
        if !self.active_servers.contains(&ip) {
            self.active_servers.push(ip.clone());
        }
        if !self.all_servers.iter().any(|s| s.ip == ip) {
            self.all_servers.push(StorageServer::new(ip));
        }
    }
}

/// A point-in-time, read-only view of a group used by `HealthProber` to
/// decide what to probe without holding the store's lock for the
/// duration of the sweep.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub group_name: String,
    pub active_servers: Vec<String>,
    pub storage_http_port: u16,
    pub http_server_count: usize,
    pub last_trunk_server_id: String,
    pub trunk_server: Option<String>,
}

/// External collaborator interface the core reads membership through and
/// mutates named probe-state fields via. All methods are synchronous: the
/// in-memory implementation only ever does brief lock acquisitions or
/// (for persistence) blocking file I/O offloaded internally.
pub trait MembershipStore: Send + Sync {
    fn group_names(&self) -> Vec<String>;

    fn group_snapshot(&self, name: &str) -> Option<GroupSnapshot>;

    /// Run `f` against the named server's mutable probe state. Returns
    /// `false` if the group or server is unknown.
    fn with_storage_mut(&self, group: &str, ip: &str, f: &mut dyn FnMut(&mut StorageServer)) -> bool;

    /// Atomically replace `http_servers`/`http_server_count` for a group.
    /// Returns `Some(changed)` where `changed` is whether the count
    /// differed from the previous value, or `None` if the group is
    /// unknown.
    fn publish_http_servers(&self, group: &str, servers: Vec<String>) -> Option<bool>;

    /// Whether a storage server with this id exists in the group.
    fn storage_exists(&self, group: &str, id: &str) -> bool;

    /// Set (or clear, when `trunk_server_id` is `None`) a group's trunk
    /// assignment. Returns `false` if the group is unknown.
    fn set_trunk(&self, group: &str, trunk_server_id: Option<&str>) -> bool;

    /// Persist the current membership tables. Called after the ping loop
    /// processes at least one trunk-assignment record.
    fn save_groups(&self) -> std::io::Result<()>;

    /// Recompute trunk-server assignments for every group. Called exactly
    /// once, on leader ascension.
    fn find_trunk_servers(&self) -> std::io::Result<()>;

    /// Walk every group/server and run `f(group_name, ip, fail_count > 1)`
    /// — used by the prober's shutdown summary sweep.
    fn for_each_server(&self, f: &mut dyn FnMut(&str, &StorageServer));
}
