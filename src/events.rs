use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Local;
use serde_json::Value;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::{
    error::Result,
    models::{Event, EventType},
};

pub const MAX_EVENTS: usize = 100;

/// Bounded newest-first activity log, mirrored to an append-only JSON lines file.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<Mutex<EventLogInner>>,
}

struct EventLogInner {
    recent: VecDeque<Event>,
    path: PathBuf,
}

impl EventLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let recent = match fs::read_to_string(&path).await {
            Ok(content) => restore(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => {
                tracing::warn!("Could not load existing events from {}: {}", path.display(), e);
                VecDeque::new()
            }
        };

        tracing::debug!("Restored {} events from {}", recent.len(), path.display());

        Ok(Self {
            inner: Arc::new(Mutex::new(EventLogInner { recent, path })),
        })
    }

    pub async fn record(&self, kind: EventType, message: impl Into<String>, details: Value) -> Event {
        let details = match details {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        let event = Event {
            timestamp: Local::now(),
            kind,
            message: message.into(),
            details,
        };

        let mut inner = self.inner.lock().await;
        inner.recent.push_front(event.clone());
        inner.recent.truncate(MAX_EVENTS);

        if let Err(e) = append_line(&inner.path, &event).await {
            tracing::error!("Failed to write event log: {}", e);
        }
        drop(inner);

        tracing::info!("[{}] {}", event.kind, event.message);
        event
    }

    pub async fn recent(&self, limit: usize) -> Vec<Event> {
        let inner = self.inner.lock().await;
        inner.recent.iter().take(limit.min(MAX_EVENTS)).cloned().collect()
    }
}

fn restore(content: &str) -> VecDeque<Event> {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(MAX_EVENTS);

    lines[start..]
        .iter()
        .rev()
        .filter_map(|line| serde_json::from_str::<Event>(line.trim()).ok())
        .collect()
}

async fn append_line(path: &Path, event: &Event) -> std::io::Result<()> {
    let mut line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    line.push('\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
