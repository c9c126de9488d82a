pub mod events;
pub mod health;
pub mod images;
pub mod stats;

use std::time::Duration;

use serde_json::json;

use crate::{
    error::{AppError, Result},
    events::EventLog,
    models::{Config, EventType},
    security::{NetworkContext, RateLimiter},
    storage::{FileStorage, MetadataStore},
};

#[derive(Clone)]
pub struct AppState {
    pub storage: FileStorage,
    pub metadata: MetadataStore,
    pub events: EventLog,
    pub network: NetworkContext,
    pub limiter: RateLimiter,
    pub max_upload_size: usize,
}

impl AppState {
    pub async fn from_config(config: &Config, network: NetworkContext) -> Result<Self> {
        let storage = FileStorage::new(&config.upload_dir).await?;
        tracing::info!("File storage initialized at {}", storage.base_path.display());

        let metadata = MetadataStore::new(&config.database_url).await?;
        tracing::info!("Image index initialized");

        let events = EventLog::open(&config.event_log_path).await?;

        Ok(Self {
            storage,
            metadata,
            events,
            network,
            limiter: RateLimiter::new(
                config.rate_limit_requests,
                Duration::from_secs(config.rate_limit_window_secs),
            ),
            max_upload_size: config.max_upload_size(),
        })
    }
}

/// Records unexpected failures as ERROR events before handing them back.
pub(crate) async fn report(state: &AppState, address: &str, operation: &str, err: AppError) -> AppError {
    if err.is_internal() {
        state
            .events
            .record(
                EventType::Error,
                format!("{} failed: {}", operation, err),
                json!({ "ip": address, "operation": operation }),
            )
            .await;
    }
    err
}
