//! Static-membership leader election and leadership maintenance.
//!
//! Every tracker runs one of these. While `leader_index < 0` the loop is
//! in Selection mode, sampling every configured peer and picking a
//! winner by a fixed comparator. Once a leader is agreed the loop
//! switches to Ping mode (or, for the leader itself, idles — the
//! daemon's listener answers pings) until three consecutive ping
//! failures demote the leader back to unknown.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tracker_protocol::config::{ElectionConfig, TrackerAddr};
use tracker_protocol::error::TransportError;
use tracker_protocol::failure_counter::{FailureCounter, FailureKind};
use tracker_protocol::wire::{decode_trunk_records, encode_ip_port, Command, Header, Status};
use tracker_protocol::{MAX_SELECT_SLEEP_SECONDS, PING_FAILURE_DEMOTE_THRESHOLD};
use tracker_store::MembershipStore;

use crate::health_prober::{HealthProber, ProberHandle};
use crate::net;
use crate::status_sampler::{self, RunningStatus, SampleError, Timeouts};

#[derive(Debug)]
pub enum SelectError {
    /// No peer reported (or recognized) a leader this round.
    NotFound,
    Transport(TransportError),
}

#[derive(Default)]
struct LeaderLink {
    stream: Option<TcpStream>,
    consecutive_failures: u32,
    /// Hysteresis over raw ping outcomes, independent of the demote
    /// threshold below: every transient transport failure is counted
    /// and logged on transition, the same as a storage probe failure.
    counter: FailureCounter,
}

/// Visibility/control surface shared with the daemon's status endpoint.
#[derive(Clone)]
pub struct ElectionHandle {
    leader_index: Arc<AtomicI32>,
    self_is_leader: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ElectionHandle {
    pub fn leader_index(&self) -> i32 {
        self.leader_index.load(Ordering::Relaxed)
    }

    pub fn is_leader(&self) -> bool {
        self.self_is_leader.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Adopt `idx` as the current leader, as directed by an incoming
    /// `COMMIT_NEXT_LEADER` from the candidate itself. Only ever called
    /// on a tracker that is not the candidate (the candidate assigns its
    /// own `leader_index` inside `run_selection` after propagation
    /// succeeds).
    pub fn accept_commit(&self, idx: usize) {
        self.self_is_leader.store(false, Ordering::Relaxed);
        self.leader_index.store(idx as i32, Ordering::Relaxed);
    }
}

pub struct ElectionLoop<S: MembershipStore> {
    store: Arc<S>,
    config: ElectionConfig,
    leader_index: Arc<AtomicI32>,
    self_is_leader: Arc<AtomicBool>,
    /// This tracker's own position in `config.tracker_servers`, if any
    /// entry matches a local address.
    own_ordinal: Option<usize>,
    /// Notified when ascension recomputes trunk assignments, so the
    /// prober's next sweep picks up the change immediately.
    prober: Option<ProberHandle>,
}

impl<S: MembershipStore + 'static> ElectionLoop<S> {
    pub fn new(store: Arc<S>, config: ElectionConfig) -> Self {
        let own_ordinal = config
            .tracker_servers
            .iter()
            .position(|peer| config.is_self(peer));
        Self {
            store,
            leader_index: Arc::new(AtomicI32::new(-1)),
            self_is_leader: Arc::new(AtomicBool::new(false)),
            own_ordinal,
            prober: None,
            config,
        }
    }

    /// Wire in the health prober so ascension can mark its membership
    /// view dirty after recomputing trunk assignments.
    pub fn with_prober(mut self, prober: ProberHandle) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn start(self) -> (ElectionHandle, tokio::task::JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let handle = ElectionHandle {
            leader_index: Arc::clone(&self.leader_index),
            self_is_leader: Arc::clone(&self.self_is_leader),
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(async move { self.run(cancel).await });
        (handle, join)
    }

    async fn run(self, cancel: CancellationToken) {
        let mut link = LeaderLink::default();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let idx = self.leader_index.load(Ordering::Relaxed);

            if idx < 0 {
                if let Err(e) = self.run_selection().await {
                    warn!(error = ?e, "election round produced no leader");
                    let jitter = 1 + rand::thread_rng().gen_range(0..MAX_SELECT_SLEEP_SECONDS);
                    if sleep_or_cancel(Duration::from_secs(jitter), &cancel).await {
                        break;
                    }
                    continue;
                }
            } else if self.self_is_leader.load(Ordering::Relaxed) {
                // Leader side of the ping protocol is served by the
                // daemon's listener; this loop has nothing to drive.
            } else {
                match self.config.tracker_servers.get(idx as usize).cloned() {
                    Some(leader) => self.run_ping(&mut link, &leader).await,
                    None => {
                        error!(index = idx, "leader_index out of range, resetting");
                        self.leader_index.store(-1, Ordering::Relaxed);
                    }
                }
            }

            if sleep_or_cancel(self.config.ping_interval(), &cancel).await {
                break;
            }
        }
    }

    async fn run_selection(&self) -> Result<(), SelectError> {
        let timeouts = Timeouts {
            connect: self.config.connect_timeout(),
            network: self.config.network_timeout(),
        };

        let mut successes: Vec<(usize, TrackerAddr, RunningStatus)> = Vec::new();
        let mut last_err = None;

        for (idx, peer) in self.config.tracker_servers.iter().enumerate() {
            match status_sampler::sample(&peer.ip, peer.port, timeouts).await {
                Ok(status) => successes.push((idx, peer.clone(), status)),
                Err(SampleError::NotFound) => {
                    last_err.get_or_insert(SelectError::NotFound);
                }
                Err(SampleError::Transport(e)) => last_err = Some(SelectError::Transport(e)),
            }
        }

        if successes.is_empty() {
            return Err(last_err.unwrap_or(SelectError::NotFound));
        }

        // Ascending total order; the last element is the chosen leader.
        // All three numeric/text fields compare with ordinary `<`/`>`
        // (no subtraction), so overflow is impossible regardless of the
        // magnitude of running_time/restart_interval.
        successes.sort_by(|a, b| sort_key(&a.1, &a.2).cmp(&sort_key(&b.1, &b.2)));

        let (winner_idx, winner_peer, winner_status) = successes.into_iter().last().unwrap();
        let is_self = Some(winner_idx) == self.own_ordinal;

        if is_self {
            self.propagate(&winner_peer)
                .await
                .map_err(SelectError::Transport)?;
            self.self_is_leader.store(true, Ordering::Relaxed);
            if let Err(e) = self.store.find_trunk_servers() {
                error!(error = %e, "find_trunk_servers failed on ascension");
            } else if let Some(prober) = &self.prober {
                prober.mark_dirty();
            }
            self.leader_index.store(winner_idx as i32, Ordering::Relaxed);
            info!(index = winner_idx, "elected self as leader");
            Ok(())
        } else if winner_status.if_leader {
            self.self_is_leader.store(false, Ordering::Relaxed);
            self.leader_index.store(winner_idx as i32, Ordering::Relaxed);
            info!(index = winner_idx, ip = %winner_peer.ip, "recognized existing leader");
            Ok(())
        } else {
            Err(SelectError::NotFound)
        }
    }

    /// Two-phase notify/commit broadcast of the chosen leader's address.
    async fn propagate(&self, winner: &TrackerAddr) -> Result<(), TransportError> {
        self.phase(Command::NotifyNextLeader, winner).await?;
        self.phase(Command::CommitNextLeader, winner).await?;
        Ok(())
    }

    async fn phase(&self, cmd: Command, winner: &TrackerAddr) -> Result<(), TransportError> {
        let body = encode_ip_port(&winner.ip, winner.port);
        let mut successes = 0u32;
        let mut last_connect_err = None;

        for peer in &self.config.tracker_servers {
            let mut stream =
                match net::connect(&peer.ip, peer.port, self.config.connect_timeout()).await {
                    Ok(s) => s,
                    Err(e) => {
                        last_connect_err = Some(e);
                        continue;
                    }
                };

            let header = Header::new(cmd, Status::Accepted, body.len() as u64);
            net::write_frame(&mut stream, header, &body, self.config.network_timeout()).await?;
            let (reply_header, _body) =
                net::read_frame(&mut stream, self.config.network_timeout()).await?;
            if !reply_header.is_accepted() {
                return Err(TransportError::ProtocolRejected);
            }
            successes += 1;
        }

        if successes == 0 {
            return Err(last_connect_err.unwrap_or(TransportError::ProtocolRejected));
        }
        Ok(())
    }

    async fn run_ping(&self, link: &mut LeaderLink, leader: &TrackerAddr) {
        match self.ping_once(link, leader).await {
            Ok(()) => {
                link.consecutive_failures = 0;
                link.counter.record_success("leader", &leader.ip);
            }
            Err(e) => {
                warn!(error = %e, leader = %leader.ip, "ping to leader failed");
                link.stream = None;
                link.consecutive_failures += 1;
                link.counter.record_failure(
                    "leader",
                    &leader.ip,
                    FailureKind::Errno(e.raw_os_error_or_eperm()),
                    &e.to_string(),
                );
                if link.consecutive_failures >= PING_FAILURE_DEMOTE_THRESHOLD {
                    error!(
                        failures = link.consecutive_failures,
                        "leader unresponsive, demoting"
                    );
                    self.leader_index.store(-1, Ordering::Relaxed);
                    self.self_is_leader.store(false, Ordering::Relaxed);
                    link.consecutive_failures = 0;
                }
            }
        }
    }

    async fn ping_once(&self, link: &mut LeaderLink, leader: &TrackerAddr) -> Result<(), TransportError> {
        if link.stream.is_none() {
            link.stream = Some(net::connect(&leader.ip, leader.port, self.config.connect_timeout()).await?);
        }
        let stream = link.stream.as_mut().expect("just populated");

        let header = Header::new(Command::PingLeader, Status::Accepted, 0);
        net::write_frame(stream, header, &[], self.config.network_timeout()).await?;
        let (reply_header, body) = net::read_frame(stream, self.config.network_timeout()).await?;
        if !reply_header.is_accepted() {
            return Err(TransportError::ProtocolRejected);
        }

        let records = decode_trunk_records(&body).ok_or(TransportError::ProtocolMalformed)?;
        if records.is_empty() {
            return Ok(());
        }

        for record in &records {
            let trunk_id = if record.trunk_server_id.is_empty() {
                None
            } else {
                Some(record.trunk_server_id.as_str())
            };
            if let Some(id) = trunk_id {
                if !self.store.storage_exists(&record.group_name, id) {
                    warn!(group = %record.group_name, storage = %id, "ping referenced unknown storage server");
                }
            }
            if !self.store.set_trunk(&record.group_name, trunk_id) {
                warn!(group = %record.group_name, "ping referenced unknown group");
            }
        }

        if let Err(e) = self.store.save_groups() {
            error!(error = %e, "save_groups failed after ping");
        }

        Ok(())
    }
}

fn sort_key(peer: &TrackerAddr, status: &RunningStatus) -> (bool, i64, i64, String, u16) {
    (
        status.if_leader,
        status.running_time,
        status.restart_interval,
        peer.ip.clone(),
        peer.port,
    )
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel.cancelled() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str, port: u16) -> TrackerAddr {
        TrackerAddr { ip: ip.to_string(), port }
    }

    fn status(if_leader: bool, running_time: i64, restart_interval: i64) -> RunningStatus {
        RunningStatus {
            if_leader,
            running_time,
            restart_interval,
        }
    }

    #[test]
    fn if_leader_outranks_everything_else() {
        let leader = (addr("10.0.0.1", 1), status(true, 1, 1));
        let longer_uptime = (addr("10.0.0.2", 1), status(false, 99999, 1));

        let mut entries = vec![leader.clone(), longer_uptime.clone()];
        entries.sort_by(|a, b| sort_key(&a.0, &a.1).cmp(&sort_key(&b.0, &b.1)));

        assert_eq!(entries.last().unwrap().0.ip, leader.0.ip);
    }

    #[test]
    fn longer_running_time_wins_among_non_leaders() {
        let short = (addr("10.0.0.1", 1), status(false, 10, 5));
        let long = (addr("10.0.0.2", 1), status(false, 5000, 5));

        let mut entries = vec![short, long.clone()];
        entries.sort_by(|a, b| sort_key(&a.0, &a.1).cmp(&sort_key(&b.0, &b.1)));

        assert_eq!(entries.last().unwrap().0.ip, long.0.ip);
    }

    #[test]
    fn larger_restart_interval_wins_tie_on_running_time() {
        let shorter_prior_run = (addr("10.0.0.1", 1), status(false, 100, 10));
        let longer_prior_run = (addr("10.0.0.2", 1), status(false, 100, 500));

        let mut entries = vec![shorter_prior_run, longer_prior_run.clone()];
        entries.sort_by(|a, b| sort_key(&a.0, &a.1).cmp(&sort_key(&b.0, &b.1)));

        assert_eq!(entries.last().unwrap().0.ip, longer_prior_run.0.ip);
    }

    #[test]
    fn ip_then_port_break_remaining_ties() {
        let a = (addr("10.0.0.1", 100), status(false, 1, 1));
        let b = (addr("10.0.0.1", 200), status(false, 1, 1));
        let c = (addr("10.0.0.9", 1), status(false, 1, 1));

        let mut entries = vec![a, b.clone(), c.clone()];
        entries.sort_by(|x, y| sort_key(&x.0, &x.1).cmp(&sort_key(&y.0, &y.1)));

        // c has the lexicographically larger ip, so it wins over both
        // entries sharing "10.0.0.1" regardless of port.
        assert_eq!(entries.last().unwrap().0.ip, c.0.ip);
    }

    fn election_config(peers: Vec<TrackerAddr>) -> ElectionConfig {
        ElectionConfig {
            tracker_servers: peers,
            local_bind_addrs: vec!["127.0.0.1".to_string()],
            own_port: 0,
            connect_timeout_secs: 1,
            network_timeout_secs: 1,
            ping_interval_ms: 1000,
        }
    }

    async fn spawn_peer(
        handler: impl FnOnce(tokio::net::TcpStream) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            + Send
            + 'static,
    ) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handler(stream).await;
        });
        port
    }

    #[tokio::test]
    async fn propagate_fails_when_commit_phase_is_rejected() {
        // A single peer that accepts NOTIFY but rejects COMMIT; the whole
        // propagation must fail even though phase one succeeded.
        let port = spawn_peer(|mut stream| {
            Box::pin(async move {
                let (header, _body) = net::read_frame(&mut stream, Duration::from_secs(1)).await.unwrap();
                assert_eq!(header.cmd, Command::NotifyNextLeader as u8);
                let reply = Header::new(Command::NotifyNextLeader, Status::Accepted, 0);
                net::write_frame(&mut stream, reply, &[], Duration::from_secs(1)).await.unwrap();

                let (header, _body) = net::read_frame(&mut stream, Duration::from_secs(1)).await.unwrap();
                assert_eq!(header.cmd, Command::CommitNextLeader as u8);
                let reply = Header::new(Command::CommitNextLeader, Status::Rejected, 0);
                net::write_frame(&mut stream, reply, &[], Duration::from_secs(1)).await.unwrap();
            })
        })
        .await;

        let peer = addr("127.0.0.1", port);
        let store = Arc::new(tracker_store::InMemoryStore::new());
        let election = ElectionLoop::new(store, election_config(vec![peer.clone()]));

        let err = election.propagate(&peer).await.unwrap_err();
        assert!(matches!(err, TransportError::ProtocolRejected));
    }

    #[tokio::test]
    async fn three_consecutive_ping_failures_demote_the_leader() {
        // Bind then drop to free the port but leave a connection to it
        // very likely to be refused immediately.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let unreachable = addr("127.0.0.1", port);

        let store = Arc::new(tracker_store::InMemoryStore::new());
        let election = ElectionLoop::new(Arc::clone(&store), election_config(vec![unreachable.clone()]));
        election.leader_index.store(0, Ordering::Relaxed);

        let mut link = LeaderLink::default();

        for _ in 0..(PING_FAILURE_DEMOTE_THRESHOLD - 1) {
            election.run_ping(&mut link, &unreachable).await;
            assert_eq!(election.leader_index.load(Ordering::Relaxed), 0);
        }
        election.run_ping(&mut link, &unreachable).await;
        assert_eq!(election.leader_index.load(Ordering::Relaxed), -1);
        assert!(!election.self_is_leader.load(Ordering::Relaxed));

        // The demote threshold resets `consecutive_failures`, but the
        // hysteresis counter keeps counting the same failure streak.
        assert_eq!(link.counter.fail_count, PING_FAILURE_DEMOTE_THRESHOLD);
    }

    #[tokio::test]
    async fn ping_applies_trunk_assignment_and_persists() {
        let store = Arc::new(tracker_store::InMemoryStore::new());
        let mut group = tracker_store::Group::new("studio-a", 9000);
        group.add_server("10.0.0.5".to_string());
        store.insert_group(group);

        let port = spawn_peer(|mut stream| {
            Box::pin(async move {
                let (header, _body) = net::read_frame(&mut stream, Duration::from_secs(1)).await.unwrap();
                assert_eq!(header.cmd, Command::PingLeader as u8);

                let records = vec![tracker_protocol::wire::TrunkRecord {
                    group_name: "studio-a".to_string(),
                    trunk_server_id: "10.0.0.5".to_string(),
                }];
                let body = tracker_protocol::wire::encode_trunk_records(&records);
                let reply = Header::new(Command::PingLeader, Status::Accepted, body.len() as u64);
                net::write_frame(&mut stream, reply, &body, Duration::from_secs(1)).await.unwrap();
            })
        })
        .await;

        let leader = addr("127.0.0.1", port);
        let election = ElectionLoop::new(Arc::clone(&store), election_config(vec![leader.clone()]));
        let mut link = LeaderLink::default();

        election.ping_once(&mut link, &leader).await.unwrap();

        let snapshot = store.group_snapshot("studio-a").unwrap();
        assert_eq!(snapshot.last_trunk_server_id, "10.0.0.5");
        assert_eq!(snapshot.trunk_server.as_deref(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn malformed_ping_body_is_reported_as_protocol_malformed() {
        let store = Arc::new(tracker_store::InMemoryStore::new());

        let port = spawn_peer(|mut stream| {
            Box::pin(async move {
                let (_header, _body) = net::read_frame(&mut stream, Duration::from_secs(1)).await.unwrap();
                // One byte short of a single trunk record: not a multiple
                // of the record width.
                let bogus = vec![0u8; 3];
                let reply = Header::new(Command::PingLeader, Status::Accepted, bogus.len() as u64);
                net::write_frame(&mut stream, reply, &bogus, Duration::from_secs(1)).await.unwrap();
            })
        })
        .await;

        let leader = addr("127.0.0.1", port);
        let election = ElectionLoop::new(store, election_config(vec![leader.clone()]));
        let mut link = LeaderLink::default();

        let err = election.ping_once(&mut link, &leader).await.unwrap_err();
        assert!(matches!(err, TransportError::ProtocolMalformed));
    }

    #[tokio::test]
    async fn ascension_marks_the_prober_dirty() {
        // A lone tracker pointed at itself: it wins selection trivially,
        // ascends, and should mark the wired-in prober dirty once
        // `find_trunk_servers` runs.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let (header, _body) = net::read_frame(&mut stream, Duration::from_secs(1)).await.unwrap();
                match Command::from_u8(header.cmd).unwrap() {
                    Command::GetTrackerStatus => {
                        let body = tracker_protocol::wire::TrackerStatusBody {
                            if_leader: false,
                            running_time: 0,
                            restart_interval: 0,
                        };
                        let reply = Header::new(
                            Command::GetTrackerStatus,
                            Status::Accepted,
                            tracker_protocol::wire::TrackerStatusBody::SIZE as u64,
                        );
                        net::write_frame(&mut stream, reply, &body.serialize(), Duration::from_secs(1))
                            .await
                            .unwrap();
                    }
                    cmd => {
                        let reply = Header::new(cmd, Status::Accepted, 0);
                        net::write_frame(&mut stream, reply, &[], Duration::from_secs(1)).await.unwrap();
                    }
                }
            }
        });

        let store = Arc::new(tracker_store::InMemoryStore::new());
        let mut group = tracker_store::Group::new("studio-a", 8080);
        group.add_server("10.0.0.1".to_string());
        store.insert_group(group);

        let mut config = election_config(vec![addr("127.0.0.1", port)]);
        config.own_port = port;

        let prober = HealthProber::new(Arc::clone(&store), tracker_protocol::config::ProberConfig {
            http_check_interval: 0,
            http_check_type: tracker_protocol::config::CheckType::Tcp,
            http_check_uri: "/status".to_string(),
            connect_timeout_secs: 1,
            network_timeout_secs: 1,
        });
        let (prober_handle, _prober_task) = prober.start();

        let election = ElectionLoop::new(Arc::clone(&store), config).with_prober(prober_handle.clone());
        election.run_selection().await.unwrap();

        assert!(prober_handle.dirty.load(Ordering::Relaxed));
    }

    #[test]
    fn election_handle_reflects_accept_commit() {
        let leader_index = Arc::new(AtomicI32::new(-1));
        let self_is_leader = Arc::new(AtomicBool::new(true));
        let handle = ElectionHandle {
            leader_index: Arc::clone(&leader_index),
            self_is_leader: Arc::clone(&self_is_leader),
            cancel: CancellationToken::new(),
        };

        handle.accept_commit(2);

        assert_eq!(handle.leader_index(), 2);
        assert!(!handle.is_leader());
    }
}
