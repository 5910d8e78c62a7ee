use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::{Group, GroupSnapshot, MembershipStore, StorageServer};

/// In-memory membership store with optional JSON snapshot persistence.
/// Readers take a read guard per access (never held across an `.await`);
/// writers take a write guard for the duration of a single mutation.
pub struct InMemoryStore {
    groups: RwLock<HashMap<String, Group>>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    pub fn with_snapshot_path(path: impl Into<PathBuf>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            snapshot_path: Some(path.into()),
        }
    }

    /// Load groups from a JSON snapshot file if it exists; otherwise start
    /// empty. Failure counters are never persisted (probe state is
    /// zero-initialized on every process start, per the data model).
    pub fn load_or_default(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let groups = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            groups: RwLock::new(groups),
            snapshot_path: Some(path),
        })
    }

    pub fn insert_group(&self, group: Group) {
        self.groups.write().unwrap().insert(group.group_name.clone(), group);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipStore for InMemoryStore {
    fn group_names(&self) -> Vec<String> {
        self.groups.read().unwrap().keys().cloned().collect()
    }

    fn group_snapshot(&self, name: &str) -> Option<GroupSnapshot> {
        let groups = self.groups.read().unwrap();
        let g = groups.get(name)?;
        Some(GroupSnapshot {
            group_name: g.group_name.clone(),
            active_servers: g.active_servers.clone(),
            storage_http_port: g.storage_http_port,
            http_server_count: g.http_server_count,
            last_trunk_server_id: g.last_trunk_server_id.clone(),
            trunk_server: g.trunk_server.clone(),
        })
    }

    fn with_storage_mut(&self, group: &str, ip: &str, f: &mut dyn FnMut(&mut StorageServer)) -> bool {
        let mut groups = self.groups.write().unwrap();
        let Some(g) = groups.get_mut(group) else {
            return false;
        };
        let Some(server) = g.all_servers.iter_mut().find(|s| s.ip == ip) else {
            return false;
        };
        f(server);
        true
    }

    fn publish_http_servers(&self, group: &str, servers: Vec<String>) -> Option<bool> {
        let mut groups = self.groups.write().unwrap();
        let g = groups.get_mut(group)?;
        let changed = servers.len() != g.http_server_count;
        if changed {
            debug!(
                group = group,
                old_count = g.http_server_count,
                new_count = servers.len(),
                "http server count changed"
            );
        }
        g.http_server_count = servers.len();
        g.http_servers = servers;
        Some(changed)
    }

    fn storage_exists(&self, group: &str, id: &str) -> bool {
        let groups = self.groups.read().unwrap();
        groups
            .get(group)
            .map(|g| g.all_servers.iter().any(|s| s.ip == id))
            .unwrap_or(false)
    }

    fn set_trunk(&self, group: &str, trunk_server_id: Option<&str>) -> bool {
        let mut groups = self.groups.write().unwrap();
        let Some(g) = groups.get_mut(group) else {
            return false;
        };
        match trunk_server_id {
            Some(id) => {
                g.last_trunk_server_id = id.to_string();
                g.trunk_server = if g.all_servers.iter().any(|s| s.ip == id) {
                    Some(id.to_string())
                } else {
                    None
                };
            }
            None => {
                g.last_trunk_server_id.clear();
                g.trunk_server = None;
            }
        }
        true
    }

    fn save_groups(&self) -> std::io::Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let groups = self.groups.read().unwrap();
        let text = serde_json::to_string_pretty(&*groups)?;
        std::fs::write(path, text)?;
        info!(path = %path.display(), "membership snapshot saved");
        Ok(())
    }

    fn find_trunk_servers(&self) -> std::io::Result<()> {
        let mut groups = self.groups.write().unwrap();
        for g in groups.values_mut() {
            if g.trunk_server.is_none() {
                if let Some(candidate) = g.active_servers.first().cloned() {
                    info!(group = %g.group_name, trunk = %candidate, "assigned trunk server");
                    g.last_trunk_server_id = candidate.clone();
                    g.trunk_server = Some(candidate);
                }
            }
        }
        Ok(())
    }

    fn for_each_server(&self, f: &mut dyn FnMut(&str, &StorageServer)) {
        let groups = self.groups.read().unwrap();
        for g in groups.values() {
            for s in &g.all_servers {
                f(&g.group_name, s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut g = Group::new("group1", 8080);
        g.add_server("10.0.0.1");
        g.add_server("10.0.0.2");
        store.insert_group(g);
        store
    }

    #[test]
    fn publish_http_servers_reports_count_change() {
        let store = sample_store();
        let changed = store
            .publish_http_servers("group1", vec!["10.0.0.1".to_string()])
            .unwrap();
        assert!(changed);
        let snap = store.group_snapshot("group1").unwrap();
        assert_eq!(snap.http_server_count, 1);

        let changed_again = store
            .publish_http_servers("group1", vec!["10.0.0.1".to_string()])
            .unwrap();
        assert!(!changed_again);
    }

    #[test]
    fn with_storage_mut_mutates_counter() {
        let store = sample_store();
        let found = store.with_storage_mut("group1", "10.0.0.1", &mut |s| {
            s.counter.record_failure("group1", "10.0.0.1", tracker_protocol::failure_counter::FailureKind::Errno(111), "refused");
        });
        assert!(found);

        let mut seen_fail_count = 0;
        store.for_each_server(&mut |_g, s| {
            if s.ip == "10.0.0.1" {
                seen_fail_count = s.counter.fail_count;
            }
        });
        assert_eq!(seen_fail_count, 1);
    }

    #[test]
    fn find_trunk_servers_assigns_first_active_when_none_set() {
        let store = sample_store();
        store.set_trunk("group1", None);
        store.find_trunk_servers().unwrap();
        let snap = store.group_snapshot("group1").unwrap();
        assert_eq!(snap.trunk_server.as_deref(), Some("10.0.0.1"));
        assert_eq!(snap.last_trunk_server_id, "10.0.0.1");
    }

    #[test]
    fn unknown_group_operations_return_false_or_none() {
        let store = sample_store();
        assert!(!store.with_storage_mut("missing", "x", &mut |_| {}));
        assert!(store.publish_http_servers("missing", vec![]).is_none());
        assert!(!store.set_trunk("missing", None));
        assert!(!store.storage_exists("missing", "x"));
    }

    #[test]
    fn snapshot_round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let store = InMemoryStore::with_snapshot_path(path.clone());
        let mut g = Group::new("group1", 8080);
        g.add_server("10.0.0.1");
        store.insert_group(g);
        store.set_trunk("group1", Some("10.0.0.1"));
        store.save_groups().unwrap();
        assert!(path.exists());

        let reloaded = InMemoryStore::load_or_default(path.clone()).unwrap();
        let snap = reloaded.group_snapshot("group1").unwrap();
        assert_eq!(snap.trunk_server.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn load_or_default_starts_empty_when_no_snapshot_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-snapshot.json");

        let store = InMemoryStore::load_or_default(path).unwrap();
        assert!(store.group_names().is_empty());
    }
}
