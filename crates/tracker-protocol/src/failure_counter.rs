//! Per-storage-server probe hysteresis.
//!
//! Lives in `tracker-protocol` rather than `tracker-core` because the
//! state it tracks (`fail_count`, `last_errno`/`last_http_status`,
//! `error_info_text`) is embedded directly in `tracker-store`'s
//! `StorageServer` record — putting the type here avoids a dependency
//! cycle between the store and the core while keeping the operations
//! next to the state they own. `tracker-core::health_prober` applies it
//! to storage probes; `tracker-core::election_loop` reuses it for the
//! same hysteresis over leader ping outcomes.

use tracing::{error, info};

/// The kind of failure observed on the last probe. A TCP-mode prober only
/// ever produces `Errno`; an HTTP-mode prober only ever produces
/// `HttpStatus`. Comparing the whole enum (not just the payload) means a
/// mode switch is itself treated as a kind change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Errno(i32),
    HttpStatus(u16),
}

/// What `record_success`/`record_failure` decided to do, for callers that
/// want to assert on behavior without scraping log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureLog {
    /// No log was emitted.
    None,
    /// The server had been failing and is now alive again.
    Recovered { prior_attempts: u32 },
    /// A new failure signature started; `prior_summary` is set when the
    /// previous streak was long enough to warrant its own summary line.
    NewFailure {
        prior_summary: Option<(u32, String)>,
    },
    /// Same failure signature as before; `fail_count` was incremented.
    Repeated { fail_count: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct FailureCounter {
    pub fail_count: u32,
    last_kind: Option<FailureKind>,
    pub error_info_text: String,
}

impl FailureCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call on every successful probe.
    pub fn record_success(&mut self, group: &str, ip: &str) -> FailureLog {
        if self.fail_count == 0 {
            return FailureLog::None;
        }
        let prior_attempts = self.fail_count;
        info!(
            group = group,
            server = ip,
            attempts = prior_attempts,
            "alive after {} attempts",
            prior_attempts
        );
        self.fail_count = 0;
        self.last_kind = None;
        FailureLog::Recovered { prior_attempts }
    }

    /// Call on every failed probe. `detail` becomes the new
    /// `error_info_text` only when the failure signature changes.
    pub fn record_failure(&mut self, group: &str, ip: &str, kind: FailureKind, detail: &str) -> FailureLog {
        let changed = self.last_kind != Some(kind);
        if !changed {
            self.fail_count += 1;
            return FailureLog::Repeated {
                fail_count: self.fail_count,
            };
        }

        let prior_summary = if self.fail_count > 1 {
            let summary = (self.fail_count, self.error_info_text.clone());
            error!(
                group = group,
                server = ip,
                attempts = summary.0,
                detail = %summary.1,
                "fail after {} attempts: {}", summary.0, summary.1
            );
            Some(summary)
        } else {
            None
        };

        self.error_info_text = detail.to_string();
        self.last_kind = Some(kind);
        self.fail_count = 1;
        error!(
            group = group,
            server = ip,
            detail = %self.error_info_text,
            "probe failed: {}", self.error_info_text
        );

        FailureLog::NewFailure { prior_summary }
    }

    /// Emitted once at shutdown for any server whose last streak exceeded
    /// one failed attempt (mirrors the prober's final sweep).
    pub fn shutdown_summary(&self, group: &str, ip: &str) {
        if self.fail_count > 1 {
            error!(
                group = group,
                server = ip,
                attempts = self.fail_count,
                detail = %self.error_info_text,
                "fail after {} attempts: {} (shutdown)", self.fail_count, self.error_info_text
            );
        }
    }
}
