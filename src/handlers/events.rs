use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::{events::MAX_EVENTS, handlers::AppState, models::Event};

const DEFAULT_LIMIT: usize = 50;

#[derive(Deserialize)]
pub struct EventsQuery {
    limit: Option<String>,
}

/// Most recent events, newest first. An unreadable limit means the default.
pub async fn recent_events(
    State(state): State<AppState>,
    Query(params): Query<EventsQuery>,
) -> Json<Vec<Event>> {
    let limit = params
        .limit
        .and_then(|l| l.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_LIMIT)
        .min(MAX_EVENTS);

    Json(state.events.recent(limit).await)
}
