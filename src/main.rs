use std::net::SocketAddr;

use feedercam::{
    AppState, cleanup, models::Config, models::EventType, security::NetworkContext,
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedercam=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting feedercam");

    let config = Config::load()?;
    tracing::info!("Configuration loaded successfully");
    tracing::debug!(
        "Server will bind to {}:{}",
        config.server_host,
        config.server_port
    );
    tracing::debug!("Upload directory: {}", config.upload_dir);
    tracing::debug!("Event log: {}", config.event_log_path);
    tracing::debug!("Database URL: {}", config.database_url);
    tracing::debug!(
        "Rate limit: {} requests per {}s",
        config.rate_limit_requests,
        config.rate_limit_window_secs
    );
    tracing::debug!("Max upload size: {} MB", config.max_upload_size_mb);

    let network = NetworkContext::detect(config.strict_subnet);
    let state = AppState::from_config(&config, network).await?;

    state
        .events
        .record(
            EventType::Server,
            "Server started (local network only)",
            json!({
                "port": config.server_port,
                "server_ip": state.network.server_ip.to_string(),
                "network": state.network.subnet_label(),
            }),
        )
        .await;

    tracing::info!(
        "Accepting uploads from {} ({})",
        state.network.subnet_label(),
        if config.strict_subnet { "strict" } else { "any private range" }
    );

    tokio::spawn(cleanup::start_limiter_sweep(state.clone()));

    if let Some(days) = config.auto_cleanup_days {
        tokio::spawn(cleanup::start_cleanup_task(state.clone(), days));
    }

    let app = feedercam::router(state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
