use std::{collections::HashMap, path::Path, str::FromStr};

use chrono::{DateTime, Local};
use sqlx::{Row, SqlitePool, sqlite::SqliteConnectOptions};

use crate::{error::Result, models::ImageRecord};

/// SQLite sidecar holding structured metadata for every ingested image.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        if let Some(db_path) = database_url.strip_prefix("sqlite:") {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                day TEXT NOT NULL,
                filename TEXT NOT NULL,
                size INTEGER NOT NULL,
                etag TEXT NOT NULL,
                source_ip TEXT NOT NULL,
                captured_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_day ON images(day)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    pub async fn insert(&self, record: &ImageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO images (id, path, day, filename, size, etag, source_ip, captured_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                etag = excluded.etag,
                source_ip = excluded.source_ip,
                captured_at = excluded.captured_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.path)
        .bind(&record.day)
        .bind(&record.filename)
        .bind(record.size)
        .bind(&record.etag)
        .bind(&record.source_ip)
        .bind(record.captured_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, path: &str) -> Result<Option<ImageRecord>> {
        let row = sqlx::query(
            "SELECT id, path, day, filename, size, etag, source_ip, captured_at
             FROM images WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            let captured_at: String = row.get("captured_at");
            Some(ImageRecord {
                id: row.get("id"),
                path: row.get("path"),
                day: row.get("day"),
                filename: row.get("filename"),
                size: row.get("size"),
                etag: row.get("etag"),
                source_ip: row.get("source_ip"),
                captured_at: parse_instant(&captured_at)?,
            })
        }))
    }

    /// Capture time (`HH:MM:SS`) of every indexed image of a day, by filename.
    pub async fn times_for_day(&self, day: &str) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT filename, captured_at FROM images WHERE day = ?")
            .bind(day)
            .fetch_all(&self.pool)
            .await?;

        let mut times = HashMap::new();
        for row in rows {
            let captured_at: String = row.get("captured_at");
            if let Some(instant) = parse_instant(&captured_at) {
                times.insert(
                    row.get::<String, _>("filename"),
                    instant.format("%H:%M:%S").to_string(),
                );
            }
        }

        Ok(times)
    }

    pub async fn delete(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM images WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_day(&self, day: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM images WHERE day = ?")
            .bind(day)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn parse_instant(value: &str) -> Option<DateTime<Local>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|instant| instant.with_timezone(&Local))
}
