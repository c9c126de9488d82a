use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Upload,
    Delete,
    DeleteMultiple,
    Cleanup,
    Security,
    Error,
    Server,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::Upload => "UPLOAD",
            EventType::Delete => "DELETE",
            EventType::DeleteMultiple => "DELETE_MULTIPLE",
            EventType::Cleanup => "CLEANUP",
            EventType::Security => "SECURITY",
            EventType::Error => "ERROR",
            EventType::Server => "SERVER",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Local>,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// An image persisted by the ingestor.
#[derive(Debug, Clone, Serialize)]
pub struct StoredImage {
    pub filename: String,
    pub date: String,
    pub time: String,
    pub size: u64,
    pub path: String,
}

impl StoredImage {
    pub fn size_kb(&self) -> f64 {
        round2(self.size as f64 / 1024.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    pub id: String,
    pub path: String,
    pub day: String,
    pub filename: String,
    pub size: i64,
    pub etag: String,
    pub source_ip: String,
    pub captured_at: DateTime<Local>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageEntry {
    pub filename: String,
    pub path: String,
    pub size: u64,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub path: String,
    pub size_kb: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct StatsResponse {
    pub total_images: u64,
    pub total_size_mb: f64,
    pub total_days: usize,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub deleted: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkDeleteError {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct BulkDeleteResponse {
    pub success: bool,
    pub deleted: Vec<String>,
    pub deleted_count: usize,
    pub errors: Vec<BulkDeleteError>,
    pub error_count: usize,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub deleted_count: usize,
    pub days_threshold: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Local>,
    pub local_access: bool,
    pub server_ip: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub upload_dir: String,
    pub event_log_path: String,
    pub database_url: String,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: usize,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
    /// Only trust the inferred /24 instead of every private range.
    #[serde(default)]
    pub strict_subnet: bool,
    pub auto_cleanup_days: Option<i64>,
}

fn default_max_upload_size() -> usize {
    10
}

fn default_rate_limit_requests() -> u32 {
    1000
}

fn default_rate_limit_window() -> u64 {
    60
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
