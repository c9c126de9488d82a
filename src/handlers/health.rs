use axum::{
    Json,
    extract::{Request, State},
};
use chrono::Local;

use crate::{auth::peer_address, handlers::AppState, models::HealthResponse};

/// Liveness probe, reachable from anywhere. Reports whether the caller would
/// pass the local network check without enforcing it.
pub async fn health(State(state): State<AppState>, request: Request) -> Json<HealthResponse> {
    let local_access = peer_address(&request)
        .map(|address| state.network.is_on_local_network(&address))
        .unwrap_or(false);

    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Local::now(),
        local_access,
        server_ip: state.network.server_ip.to_string(),
    })
}
