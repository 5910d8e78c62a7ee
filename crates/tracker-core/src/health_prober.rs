//! Concurrent-safe periodic supervision of storage liveness.
//!
//! Sweeps every group on a fixed cadence, probing each active server via
//! the configured mode and republishing the group's eligible-for-HTTP
//! list. A sweep can be abandoned early by a stop request or by
//! membership becoming dirty; either way the next iteration begins
//! immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use tracker_protocol::config::{CheckType, ProberConfig};
use tracker_protocol::failure_counter::FailureKind;
use tracker_store::MembershipStore;

#[derive(Debug)]
enum ProbeOutcome {
    Success,
    Failure(FailureKind, String),
}

async fn probe_tcp(ip: &str, port: u16, connect_timeout: Duration) -> ProbeOutcome {
    match timeout(connect_timeout, TcpStream::connect((ip, port))).await {
        Ok(Ok(_stream)) => ProbeOutcome::Success,
        Ok(Err(e)) => {
            let errno = e.raw_os_error().unwrap_or(1); // EPERM fallback for a zero errno
            ProbeOutcome::Failure(FailureKind::Errno(errno), e.to_string())
        }
        Err(_) => ProbeOutcome::Failure(FailureKind::Errno(libc_etimedout()), "connect timed out".to_string()),
    }
}

async fn probe_http(
    ip: &str,
    port: u16,
    uri: &str,
    connect_timeout: Duration,
    network_timeout: Duration,
) -> ProbeOutcome {
    let client = match reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(network_timeout)
        .build()
    {
        Ok(c) => c,
        Err(e) => return ProbeOutcome::Failure(FailureKind::Errno(libc_etimedout()), e.to_string()),
    };

    let url = format!("http://{}:{}{}", ip, port, uri);
    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            // Drain the body regardless of outcome.
            let _ = resp.bytes().await;
            if status.as_u16() == 200 {
                ProbeOutcome::Success
            } else {
                ProbeOutcome::Failure(
                    FailureKind::HttpStatus(status.as_u16()),
                    format!("status={}", status.as_u16()),
                )
            }
        }
        Err(e) => {
            let errno = e
                .source_errno()
                .unwrap_or(libc_etimedout());
            ProbeOutcome::Failure(FailureKind::Errno(errno), e.to_string())
        }
    }
}

/// Best-effort extraction of a raw OS error from a `reqwest::Error`'s
/// source chain; falls back to a timeout-like errno when none is found.
trait SourceErrno {
    fn source_errno(&self) -> Option<i32>;
}

impl SourceErrno for reqwest::Error {
    fn source_errno(&self) -> Option<i32> {
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
                return io_err.raw_os_error();
            }
            source = err.source();
        }
        None
    }
}

fn libc_etimedout() -> i32 {
    110
}

/// Visibility/control surface shared with the daemon's status endpoint.
#[derive(Clone)]
pub struct ProberHandle {
    pub running: Arc<AtomicBool>,
    pub dirty: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ProberHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Notify the prober that group membership changed; the current
    /// sweep (if any) is abandoned and the next one starts immediately.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

pub struct HealthProber<S: MembershipStore> {
    store: Arc<S>,
    config: ProberConfig,
    running: Arc<AtomicBool>,
    dirty: Arc<AtomicBool>,
}

impl<S: MembershipStore + 'static> HealthProber<S> {
    pub fn new(store: Arc<S>, config: ProberConfig) -> Self {
        Self {
            store,
            config,
            running: Arc::new(AtomicBool::new(false)),
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background sweep loop; returns a handle for querying
    /// liveness and signalling dirty/stop, plus the task's join handle.
    pub fn start(self) -> (ProberHandle, tokio::task::JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let handle = ProberHandle {
            running: Arc::clone(&self.running),
            dirty: Arc::clone(&self.dirty),
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(async move { self.run(cancel).await });
        (handle, join)
    }

    async fn run(self, cancel: CancellationToken) {
        if !self.config.enabled() {
            debug!("health prober disabled (http_check_interval <= 0)");
            return;
        }
        self.running.store(true, Ordering::Relaxed);

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.dirty.store(false, Ordering::Relaxed);

            for group_name in self.store.group_names() {
                if cancel.is_cancelled() || self.dirty.load(Ordering::Relaxed) {
                    break;
                }
                self.sweep_group(&group_name, &cancel).await;
            }

            if cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval()) => {}
                _ = cancel.cancelled() => break,
            }
        }

        self.running.store(false, Ordering::Relaxed);
        self.store.for_each_server(&mut |group, server| {
            server.counter.shutdown_summary(group, &server.ip);
        });
    }

    #[instrument(skip(self, cancel), fields(group = %group_name))]
    async fn sweep_group(&self, group_name: &str, cancel: &CancellationToken) {
        let Some(group) = self.store.group_snapshot(group_name) else {
            return;
        };
        if group.storage_http_port == 0 {
            return;
        }

        let mut http_servers = Vec::new();
        let mut aborted = false;

        for ip in &group.active_servers {
            if cancel.is_cancelled() || self.dirty.load(Ordering::Relaxed) {
                aborted = true;
                break;
            }

            let outcome = match self.config.http_check_type {
                CheckType::Tcp => probe_tcp(ip, group.storage_http_port, self.config.connect_timeout()).await,
                CheckType::Http => {
                    probe_http(
                        ip,
                        group.storage_http_port,
                        &self.config.http_check_uri,
                        self.config.connect_timeout(),
                        self.config.network_timeout(),
                    )
                    .await
                }
            };

            match outcome {
                ProbeOutcome::Success => {
                    http_servers.push(ip.clone());
                    self.store.with_storage_mut(group_name, ip, &mut |s| {
                        s.counter.record_success(group_name, ip);
                    });
                }
                ProbeOutcome::Failure(kind, detail) => {
                    self.store.with_storage_mut(group_name, ip, &mut |s| {
                        s.counter.record_failure(group_name, ip, kind, &detail);
                    });
                }
            }

            if cancel.is_cancelled() || self.dirty.load(Ordering::Relaxed) {
                aborted = true;
                break;
            }
        }

        if !aborted {
            self.store.publish_http_servers(group_name, http_servers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_probe_succeeds_against_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let outcome = probe_tcp("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(matches!(outcome, ProbeOutcome::Success));
    }

    #[tokio::test]
    async fn tcp_probe_fails_against_closed_port() {
        // Bind then immediately drop to free the port but make a
        // connection to it very likely refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = probe_tcp("127.0.0.1", port, Duration::from_millis(500)).await;
        assert!(matches!(outcome, ProbeOutcome::Failure(FailureKind::Errno(_), _)));
    }

    fn prober_config() -> ProberConfig {
        ProberConfig {
            http_check_interval: 10,
            http_check_type: CheckType::Tcp,
            http_check_uri: "/status".to_string(),
            connect_timeout_secs: 1,
            network_timeout_secs: 1,
        }
    }

    fn prober(store: Arc<tracker_store::InMemoryStore>) -> HealthProber<tracker_store::InMemoryStore> {
        HealthProber {
            store,
            config: prober_config(),
            running: Arc::new(AtomicBool::new(false)),
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn sweep_publishes_reachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while listener.accept().await.is_ok() {}
        });

        let store = Arc::new(tracker_store::InMemoryStore::new());
        let mut group = tracker_store::Group::new("studio-a", port);
        group.add_server("127.0.0.1".to_string());
        store.insert_group(group);

        let prober = prober(Arc::clone(&store));
        prober.sweep_group("studio-a", &CancellationToken::new()).await;

        let snapshot = store.group_snapshot("studio-a").unwrap();
        assert_eq!(snapshot.http_server_count, 1);
    }

    #[tokio::test]
    async fn sweep_aborts_without_publishing_when_membership_goes_dirty() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while listener.accept().await.is_ok() {}
        });

        let store = Arc::new(tracker_store::InMemoryStore::new());
        let mut group = tracker_store::Group::new("studio-a", port);
        group.add_server("127.0.0.1".to_string());
        store.insert_group(group);

        let prober = prober(Arc::clone(&store));
        prober.dirty.store(true, Ordering::Relaxed);
        prober.sweep_group("studio-a", &CancellationToken::new()).await;

        // The sweep was abandoned before probing anything, so the
        // group's published count is untouched.
        let snapshot = store.group_snapshot("studio-a").unwrap();
        assert_eq!(snapshot.http_server_count, 0);
    }
}
