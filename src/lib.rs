pub mod auth;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod security;
pub mod storage;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

pub use handlers::AppState;

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/upload", post(handlers::images::upload))
        .route("/api/images", get(handlers::images::list_images))
        .route("/api/events", get(handlers::events::recent_events))
        .route("/api/stats", get(handlers::stats::get_stats))
        .route("/uploads/{*path}", get(handlers::images::serve_image))
        .route("/api/delete/{*path}", delete(handlers::images::delete_image))
        .route(
            "/api/delete-multiple",
            post(handlers::images::delete_multiple),
        )
        .route("/api/cleanup", post(handlers::images::cleanup))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::local_network_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health))
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
