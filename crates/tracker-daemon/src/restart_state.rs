//! Tracks how long the previous run lasted so `GET_TRACKER_STATUS` can
//! report a meaningful `restart_interval` across restarts, persisted
//! next to the membership snapshot.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PersistedRun {
    started_at_unix: u64,
    ended_at_unix: u64,
}

pub struct RestartState {
    path: PathBuf,
    started_at: Instant,
    started_at_unix: u64,
    restart_interval_secs: i64,
}

impl RestartState {
    /// Load the previous run's duration (if the file exists and parses)
    /// and start tracking the current run.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let started_at_unix = unix_now();
        let restart_interval_secs = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<PersistedRun>(&s).ok())
            .map(|run| run.ended_at_unix.saturating_sub(run.started_at_unix) as i64)
            .unwrap_or(0);

        Self {
            path,
            started_at: Instant::now(),
            started_at_unix,
            restart_interval_secs,
        }
    }

    pub fn running_time_secs(&self) -> i64 {
        self.started_at.elapsed().as_secs() as i64
    }

    pub fn restart_interval_secs(&self) -> i64 {
        self.restart_interval_secs
    }

    /// Persist this run's span so the *next* process can report it as
    /// `restart_interval`.
    pub fn save_on_shutdown(&self) {
        let run = PersistedRun {
            started_at_unix: self.started_at_unix,
            ended_at_unix: unix_now(),
        };
        if let Err(e) = write_atomic(&self.path, &run) {
            warn!(error = %e, "failed to persist restart state");
        }
    }
}

fn write_atomic(path: &Path, run: &PersistedRun) -> std::io::Result<()> {
    let json = serde_json::to_string(run)?;
    std::fs::write(path, json)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
