//! Localhost-only REST status endpoint for `tracker-cli`: a single JSON
//! snapshot route, no authentication, bound to an address the operator
//! configures.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use serde::Serialize;
use tracing::{error, info};

use tracker_core::{ElectionHandle, ProberHandle};
use tracker_store::MembershipStore;

struct ApiState<S: MembershipStore> {
    store: Arc<S>,
    election: ElectionHandle,
    prober: ProberHandle,
}

impl<S: MembershipStore> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            election: self.election.clone(),
            prober: self.prober.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GroupView {
    group_name: String,
    active_servers: Vec<String>,
    http_servers_count: usize,
    trunk_server: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusView {
    leader_index: i32,
    is_leader: bool,
    prober_running: bool,
    groups: Vec<GroupView>,
}

pub async fn run<S: MembershipStore + 'static>(
    bind_addr: std::net::SocketAddr,
    store: Arc<S>,
    election: ElectionHandle,
    prober: ProberHandle,
) {
    let state = ApiState { store, election, prober };

    let app = axum::Router::new()
        .route("/api/status", get(status_handler::<S>))
        .with_state(state);

    info!(addr = %bind_addr, "status api listening");

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind status api");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "status api error");
    }
}

async fn status_handler<S: MembershipStore>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    let groups = state
        .store
        .group_names()
        .into_iter()
        .filter_map(|name| state.store.group_snapshot(&name))
        .map(|g| GroupView {
            group_name: g.group_name,
            active_servers: g.active_servers,
            http_servers_count: g.http_server_count,
            trunk_server: g.trunk_server,
        })
        .collect();

    Json(StatusView {
        leader_index: state.election.leader_index(),
        is_leader: state.election.is_leader(),
        prober_running: state.prober.is_running(),
        groups,
    })
}
