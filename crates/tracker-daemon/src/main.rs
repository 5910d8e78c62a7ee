mod config;
mod restart_state;
mod status_api;
mod wire_server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tracker_core::{ElectionLoop, HealthProber};
use tracker_store::{Group, InMemoryStore};

use crate::config::DaemonConfig;
use crate::restart_state::RestartState;

#[derive(Parser, Debug)]
#[command(name = "tracker-daemon", about = "tracker control-plane daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/daemon.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config_str = tokio::fs::read_to_string(&args.config).await?;
    let config: DaemonConfig = toml::from_str(&config_str)?;

    let store = Arc::new(InMemoryStore::load_or_default(config.storage.snapshot_path.clone())?);
    for seed in &config.storage.groups {
        if store.group_snapshot(&seed.group_name).is_none() {
            let mut group = Group::new(seed.group_name.clone(), seed.storage_http_port);
            for ip in &seed.servers {
                group.add_server(ip.clone());
            }
            store.insert_group(group);
        }
    }

    let restart = Arc::new(RestartState::load(
        config.storage.snapshot_path.with_extension("restart.json"),
    ));
    info!(
        protocol_version = tracker_protocol::PROTOCOL_VERSION,
        running_time = restart.running_time_secs(),
        restart_interval = restart.restart_interval_secs(),
        "tracker-daemon starting"
    );

    let cancel = CancellationToken::new();

    let prober = HealthProber::new(Arc::clone(&store), config.prober.clone());
    let (prober_handle, prober_task) = prober.start();

    let election = ElectionLoop::new(Arc::clone(&store), config.election.clone())
        .with_prober(prober_handle.clone());
    let (election_handle, election_task) = election.start();

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], config.election.own_port));

    let wire_server_task = {
        let store = Arc::clone(&store);
        let election_handle = election_handle.clone();
        let election_config = config.election.clone();
        let restart = Arc::clone(&restart);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = wire_server::run(
                listen_addr,
                election_config,
                store,
                election_handle,
                restart,
                cancel,
            )
            .await
            {
                error!(error = %e, "control protocol listener exited");
            }
        })
    };

    let status_api_addr: SocketAddr = config
        .status_api
        .bind
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080)));
    let status_api_task = {
        let store = Arc::clone(&store);
        let election_handle = election_handle.clone();
        let prober_handle = prober_handle.clone();
        tokio::spawn(async move {
            status_api::run(status_api_addr, store, election_handle, prober_handle).await;
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    cancel.cancel();
    election_handle.stop();
    prober_handle.stop();

    election_task.abort();
    prober_task.abort();
    wire_server_task.abort();
    status_api_task.abort();

    if let Err(e) = store.save_groups() {
        warn!(error = %e, "failed to persist membership snapshot on shutdown");
    }
    restart.save_on_shutdown();

    Ok(())
}
