use axum::{Json, extract::State};

use crate::{error::Result, handlers::AppState, models::StatsResponse};

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    tracing::info!("GET request for stats");

    let stats = state.storage.stats().await?;

    tracing::debug!(
        "Stats: {} images over {} days, {} MB",
        stats.total_images,
        stats.total_days,
        stats.total_size_mb
    );

    Ok(Json(stats))
}
