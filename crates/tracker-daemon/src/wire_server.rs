//! Server side of the control protocol: answers the four commands other
//! trackers' `StatusSampler`/`ElectionLoop` send us. One task per
//! connection, spawned from the accept loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tracker_core::net as framing;
use tracker_core::ElectionHandle;
use tracker_protocol::config::ElectionConfig;
use tracker_protocol::error::TransportError;
use tracker_protocol::wire::{
    decode_ip_port, encode_trunk_records, Command, Header, Status, TrackerStatusBody, TrunkRecord,
};
use tracker_store::MembershipStore;

use crate::restart_state::RestartState;

const ACCEPT_TIMEOUT: Duration = Duration::from_secs(3600);

pub async fn run<S: MembershipStore + 'static>(
    bind_addr: std::net::SocketAddr,
    config: ElectionConfig,
    store: Arc<S>,
    election: ElectionHandle,
    restart: Arc<RestartState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "control protocol listening");

    loop {
        let accepted = tokio::select! {
            res = listener.accept() => res,
            _ = cancel.cancelled() => break,
        };

        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let config = config.clone();
        let store = Arc::clone(&store);
        let election = election.clone();
        let restart = Arc::clone(&restart);

        tokio::spawn(async move {
            if let Err(e) = serve_one(stream, &config, &store, &election, &restart).await {
                warn!(peer = %peer_addr, error = %e, "connection ended with error");
            }
        });
    }

    Ok(())
}

async fn serve_one<S: MembershipStore>(
    mut stream: TcpStream,
    config: &ElectionConfig,
    store: &Arc<S>,
    election: &ElectionHandle,
    restart: &RestartState,
) -> Result<(), TransportError> {
    let (header, body) = framing::read_frame(&mut stream, ACCEPT_TIMEOUT).await?;

    let Some(cmd) = Command::from_u8(header.cmd) else {
        return reply_empty(&mut stream, Command::GetTrackerStatus, Status::Rejected).await;
    };

    match cmd {
        Command::GetTrackerStatus => handle_status(&mut stream, election, restart).await,
        Command::NotifyNextLeader => handle_notify(&mut stream, config, &body).await,
        Command::CommitNextLeader => handle_commit(&mut stream, config, election, &body).await,
        Command::PingLeader => handle_ping(&mut stream, store, election).await,
    }
}

async fn handle_status(
    stream: &mut TcpStream,
    election: &ElectionHandle,
    restart: &RestartState,
) -> Result<(), TransportError> {
    let body = TrackerStatusBody {
        if_leader: election.is_leader(),
        running_time: restart.running_time_secs() as i32,
        restart_interval: restart.restart_interval_secs() as i32,
    };
    let header = Header::new(Command::GetTrackerStatus, Status::Accepted, TrackerStatusBody::SIZE as u64);
    framing::write_frame(stream, header, &body.serialize(), ACCEPT_TIMEOUT).await
}

async fn handle_notify(
    stream: &mut TcpStream,
    config: &ElectionConfig,
    body: &[u8],
) -> Result<(), TransportError> {
    let Some((ip, port)) = decode_ip_port(body) else {
        return reply_empty(stream, Command::NotifyNextLeader, Status::Rejected).await;
    };
    let known = config.tracker_servers.iter().any(|p| p.ip == ip && p.port == port);
    let status = if known { Status::Accepted } else { Status::Rejected };
    reply_empty(stream, Command::NotifyNextLeader, status).await
}

async fn handle_commit(
    stream: &mut TcpStream,
    config: &ElectionConfig,
    election: &ElectionHandle,
    body: &[u8],
) -> Result<(), TransportError> {
    let Some((ip, port)) = decode_ip_port(body) else {
        return reply_empty(stream, Command::CommitNextLeader, Status::Rejected).await;
    };
    let idx = config
        .tracker_servers
        .iter()
        .position(|p| p.ip == ip && p.port == port);

    match idx {
        Some(idx) => {
            election.accept_commit(idx);
            reply_empty(stream, Command::CommitNextLeader, Status::Accepted).await
        }
        None => reply_empty(stream, Command::CommitNextLeader, Status::Rejected).await,
    }
}

async fn handle_ping<S: MembershipStore>(
    stream: &mut TcpStream,
    store: &Arc<S>,
    election: &ElectionHandle,
) -> Result<(), TransportError> {
    if !election.is_leader() {
        return reply_empty(stream, Command::PingLeader, Status::Rejected).await;
    }

    let mut records = Vec::new();
    for group_name in store.group_names() {
        if let Some(snapshot) = store.group_snapshot(&group_name) {
            records.push(TrunkRecord {
                group_name: snapshot.group_name,
                trunk_server_id: snapshot.trunk_server.unwrap_or_default(),
            });
        }
    }

    let body = encode_trunk_records(&records);
    let header = Header::new(Command::PingLeader, Status::Accepted, body.len() as u64);
    framing::write_frame(stream, header, &body, ACCEPT_TIMEOUT).await
}

async fn reply_empty(stream: &mut TcpStream, cmd: Command, status: Status) -> Result<(), TransportError> {
    if matches!(status, Status::Rejected) {
        error!(?cmd, "rejecting malformed or unrecognized request");
    }
    let header = Header::new(cmd, status, 0);
    framing::write_frame(stream, header, &[], ACCEPT_TIMEOUT).await
}
