use std::time::Duration;

use chrono::Local;
use serde_json::json;
use tokio::time;

use crate::{
    error::Result,
    handlers::AppState,
    models::EventType,
    storage::retention::{CleanupOutcome, clamp_days},
};

const CLEANUP_INTERVAL_SECS: u64 = 3600;
const LIMITER_SWEEP_SECS: u64 = 60;

/// Purges day directories older than `days` and records a CLEANUP event.
pub async fn run_cleanup(state: &AppState, days: i64, address: Option<&str>) -> Result<CleanupOutcome> {
    let outcome = state.storage.cleanup(days, Local::now()).await?;

    for day in &outcome.purged_days {
        if let Err(e) = state.metadata.delete_day(day).await {
            tracing::warn!("Could not drop index entries for {}: {}", day, e);
        }
    }

    let mut details = json!({
        "deleted_count": outcome.deleted_count,
        "days": days,
    });
    if let Some(address) = address {
        details["ip"] = json!(address);
    }

    state
        .events
        .record(
            EventType::Cleanup,
            format!(
                "Cleanup done: {} images deleted (older than {} days)",
                outcome.deleted_count, days
            ),
            details,
        )
        .await;

    Ok(outcome)
}

/// Background retention, runs every hour with a fixed threshold.
pub async fn start_cleanup_task(state: AppState, days: i64) {
    let days = clamp_days(Some(days));
    let mut interval = time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));

    tracing::info!("Starting cleanup task (images older than {} days, runs every hour)", days);

    loop {
        interval.tick().await;

        match run_cleanup(&state, days, None).await {
            Ok(outcome) => {
                if outcome.deleted_count > 0 {
                    tracing::info!("Automatic cleanup removed {} images", outcome.deleted_count);
                }
            }
            Err(e) => {
                tracing::error!("Cleanup task failed: {}", e);
                state
                    .events
                    .record(
                        EventType::Error,
                        format!("cleanup failed: {}", e),
                        json!({ "operation": "auto_cleanup" }),
                    )
                    .await;
            }
        }
    }
}

/// Periodically forgets idle addresses in the rate limiter.
pub async fn start_limiter_sweep(state: AppState) {
    let mut interval = time::interval(Duration::from_secs(LIMITER_SWEEP_SECS));

    loop {
        interval.tick().await;
        tracing::debug!("rate limit storage size: {}", state.limiter.len());
        state.limiter.retain_recent();
    }
}
