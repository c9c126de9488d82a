use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use serde_json::json;

use crate::{
    error::{AppError, Result},
    handlers::AppState,
    models::EventType,
    security::client_address,
};

/// Caller address resolved by the gate, available to protected handlers.
#[derive(Debug, Clone)]
pub struct ClientAddr(pub String);

pub fn peer_address(request: &Request) -> Option<String> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_address(request.headers(), peer)
}

/// Admits local callers that are within their request budget.
///
/// The origin is checked before the rate limit, so foreign callers never
/// consume budget.
pub async fn local_network_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let address = peer_address(&request).unwrap_or_else(|| "unknown".to_string());
    let endpoint = request.uri().path().to_string();

    if !state.network.is_on_local_network(&address) {
        tracing::warn!("Rejected {} from outside the local network: {}", endpoint, address);
        state
            .events
            .record(
                EventType::Security,
                format!("Access denied - address outside local network: {}", address),
                json!({ "ip": address, "endpoint": endpoint }),
            )
            .await;
        return Err(AppError::AccessDenied("local network only".to_string()));
    }

    if !state.limiter.check_and_record(&address) {
        tracing::warn!("Rate limit exceeded for {}", address);
        state
            .events
            .record(
                EventType::Security,
                format!("Rate limit exceeded for: {}", address),
                json!({ "ip": address }),
            )
            .await;
        return Err(AppError::RateLimited);
    }

    tracing::debug!("Admitted {} for {}", address, endpoint);
    request.extensions_mut().insert(ClientAddr(address));
    Ok(next.run(request).await)
}
