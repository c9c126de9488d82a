use std::{collections::BTreeSet, path::Path};

use chrono::{DateTime, Duration, Local, NaiveDate};
use serde_json::Value;
use tokio::fs;

use crate::{
    error::{AppError, Result},
    models::BulkDeleteError,
    storage::{
        FileStorage,
        filesystem::jpg_files,
        paths::{self, relative_key},
    },
};

pub const MAX_BULK_DELETE: usize = 100;
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Default)]
pub struct BulkDeleteOutcome {
    pub deleted: Vec<String>,
    /// Normalized storage keys of `deleted`, in the same order.
    pub keys: Vec<String>,
    pub errors: Vec<BulkDeleteError>,
}

#[derive(Debug, Default)]
pub struct CleanupOutcome {
    pub deleted_count: usize,
    pub purged_days: Vec<String>,
}

pub fn clamp_days(days: Option<i64>) -> i64 {
    days.unwrap_or(DEFAULT_RETENTION_DAYS).clamp(1, 365)
}

fn day_key(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl FileStorage {
    pub async fn delete(&self, requested: &str) -> Result<String> {
        let path = paths::resolve(&self.base_path, requested).await?;
        let key = relative_key(&self.base_path, &path);
        let _guard = self.lock_day(&day_key(&path)).await;

        remove_image(&path, requested).await?;

        if let Some(parent) = path.parent() {
            self.remove_if_empty(parent).await?;
        }

        Ok(key)
    }

    pub async fn delete_many(&self, requested: &[Value]) -> BulkDeleteOutcome {
        let mut outcome = BulkDeleteOutcome::default();
        let mut touched = BTreeSet::new();

        for item in requested {
            let Some(raw) = item.as_str() else {
                outcome.errors.push(BulkDeleteError {
                    path: item.to_string(),
                    error: "Path must be a string".to_string(),
                });
                continue;
            };

            let path = match paths::resolve(&self.base_path, raw).await {
                Ok(path) => path,
                Err(_) => {
                    outcome.errors.push(BulkDeleteError {
                        path: raw.to_string(),
                        error: "Invalid path".to_string(),
                    });
                    continue;
                }
            };

            let guard = self.lock_day(&day_key(&path)).await;
            let removed = remove_image(&path, raw).await;
            drop(guard);

            match removed {
                Ok(()) => {
                    if let Some(parent) = path.parent() {
                        touched.insert(parent.to_path_buf());
                    }
                    outcome.keys.push(relative_key(&self.base_path, &path));
                    outcome.deleted.push(raw.to_string());
                }
                Err(AppError::NotFound(_)) => outcome.errors.push(BulkDeleteError {
                    path: raw.to_string(),
                    error: "File not found".to_string(),
                }),
                Err(e) => {
                    tracing::warn!("Failed to delete {}: {}", raw, e);
                    outcome.errors.push(BulkDeleteError {
                        path: raw.to_string(),
                        error: "Could not delete file".to_string(),
                    });
                }
            }
        }

        for dir in touched {
            let day = dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let _guard = self.lock_day(&day).await;
            if let Err(e) = self.remove_if_empty(&dir).await {
                tracing::warn!("Could not remove {}: {}", dir.display(), e);
            }
        }

        outcome
    }

    /// Purges every dated day directory older than `now - days`.
    pub async fn cleanup(&self, days: i64, now: DateTime<Local>) -> Result<CleanupOutcome> {
        let cutoff = (now - Duration::days(days)).naive_local();
        let mut outcome = CleanupOutcome::default();

        for day in self.day_dirs().await? {
            let Ok(date) = NaiveDate::parse_from_str(&day, "%Y-%m-%d") else {
                tracing::debug!("Skipping non-date directory {}", day);
                continue;
            };

            let Some(midnight) = date.and_hms_opt(0, 0, 0) else {
                continue;
            };
            if midnight >= cutoff {
                continue;
            }

            let _guard = self.lock_day(&day).await;
            let dir = self.base_path.join(&day);

            for (filename, _) in jpg_files(&dir).await? {
                match fs::remove_file(dir.join(&filename)).await {
                    Ok(()) => outcome.deleted_count += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(AppError::Io(e)),
                }
            }

            self.remove_if_empty(&dir).await?;
            outcome.purged_days.push(day);
        }

        Ok(outcome)
    }
}

async fn remove_image(path: &Path, requested: &str) -> Result<()> {
    match fs::metadata(path).await {
        Ok(m) if m.is_file() => {}
        Ok(_) => return Err(AppError::NotFound(requested.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(requested.to_string()));
        }
        Err(e) => return Err(AppError::Io(e)),
    }

    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(AppError::NotFound(requested.to_string()))
        }
        Err(e) => Err(AppError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn storage() -> (tempfile::TempDir, FileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_str().unwrap()).await.unwrap();
        (dir, storage)
    }

    fn put(storage: &FileStorage, rel: &str) {
        let path = storage.base_path.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, [0xFF, 0xD8, 0xFF, 0x00]).unwrap();
    }

    #[test]
    fn clamps_threshold() {
        assert_eq!(clamp_days(None), 7);
        assert_eq!(clamp_days(Some(0)), 1);
        assert_eq!(clamp_days(Some(-4)), 1);
        assert_eq!(clamp_days(Some(30)), 30);
        assert_eq!(clamp_days(Some(10_000)), 365);
    }

    #[tokio::test]
    async fn deleting_last_image_removes_day_directory() {
        let (_dir, storage) = storage().await;
        put(&storage, "2024-05-01/IMG_a.jpg");

        let key = storage.delete("2024-05-01/IMG_a.jpg").await.unwrap();
        assert_eq!(key, "2024-05-01/IMG_a.jpg");
        assert!(!storage.base_path.join("2024-05-01").exists());
        assert!(storage.base_path.exists());
    }

    #[tokio::test]
    async fn deleting_one_of_many_keeps_the_rest() {
        let (_dir, storage) = storage().await;
        put(&storage, "2024-05-01/IMG_a.jpg");
        put(&storage, "2024-05-01/IMG_b.jpg");

        storage.delete("2024-05-01/IMG_a.jpg").await.unwrap();
        assert!(!storage.base_path.join("2024-05-01/IMG_a.jpg").exists());
        assert!(storage.base_path.join("2024-05-01/IMG_b.jpg").exists());
    }

    #[tokio::test]
    async fn delete_reports_missing_and_rejects_traversal() {
        let (_dir, storage) = storage().await;
        put(&storage, "2024-05-01/IMG_a.jpg");

        assert!(matches!(
            storage.delete("2024-05-01/IMG_zz.jpg").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete("2024-05-01").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete("../2024-05-01/IMG_a.jpg").await,
            Err(AppError::PathRejected(_))
        ));
        assert!(storage.base_path.join("2024-05-01/IMG_a.jpg").exists());
    }

    #[tokio::test]
    async fn bulk_delete_collects_errors_per_item() {
        let (_dir, storage) = storage().await;
        put(&storage, "2024-05-01/IMG_a.jpg");
        put(&storage, "2024-05-01/IMG_b.jpg");
        put(&storage, "2024-05-02/IMG_c.jpg");

        let outcome = storage
            .delete_many(&[
                json!("2024-05-01/IMG_a.jpg"),
                json!("2024-05-01/IMG_b.jpg"),
                json!("2024-05-02/IMG_missing.jpg"),
                json!("../../etc/passwd"),
                json!(42),
            ])
            .await;

        assert_eq!(outcome.deleted, ["2024-05-01/IMG_a.jpg", "2024-05-01/IMG_b.jpg"]);
        assert_eq!(outcome.errors.len(), 3);
        assert_eq!(outcome.errors[0].error, "File not found");
        assert_eq!(outcome.errors[1].error, "Invalid path");
        assert_eq!(outcome.errors[2].path, "42");

        assert!(!storage.base_path.join("2024-05-01").exists());
        assert!(storage.base_path.join("2024-05-02/IMG_c.jpg").exists());
    }

    #[tokio::test]
    async fn cleanup_purges_only_old_dated_directories() {
        let (_dir, storage) = storage().await;
        let now = Local::now();
        let old = (now - Duration::days(10)).format("%Y-%m-%d").to_string();
        let recent = (now - Duration::days(2)).format("%Y-%m-%d").to_string();

        put(&storage, &format!("{}/IMG_1.jpg", old));
        put(&storage, &format!("{}/IMG_2.jpg", old));
        put(&storage, &format!("{}/IMG_3.jpg", recent));
        put(&storage, "favourites/IMG_old.jpg");

        let outcome = storage.cleanup(7, now).await.unwrap();

        assert_eq!(outcome.deleted_count, 2);
        assert_eq!(outcome.purged_days, [old.clone()]);
        assert!(!storage.base_path.join(&old).exists());
        assert!(storage.base_path.join(&recent).join("IMG_3.jpg").exists());
        assert!(storage.base_path.join("favourites/IMG_old.jpg").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn listing_and_stats_tolerate_concurrent_deletes() {
        let (_dir, storage) = storage().await;

        for _ in 0..50 {
            let days: Vec<String> = (1..=20).map(|d| format!("2024-05-{:02}", d)).collect();
            for day in &days {
                put(&storage, &format!("{}/IMG_a.jpg", day));
            }

            let deleter = {
                let storage = storage.clone();
                tokio::spawn(async move {
                    for day in days {
                        storage.delete(&format!("{}/IMG_a.jpg", day)).await.unwrap();
                    }
                })
            };

            storage.list().await.unwrap();
            storage.stats().await.unwrap();
            deleter.await.unwrap();
        }

        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cleanup_tolerates_concurrent_deletes() {
        let (_dir, storage) = storage().await;
        let now = Local::now();
        let days: Vec<String> = (30..60)
            .map(|d| (now - Duration::days(d)).format("%Y-%m-%d").to_string())
            .collect();
        for day in &days {
            put(&storage, &format!("{}/IMG_a.jpg", day));
        }

        let deleter = {
            let storage = storage.clone();
            let days = days.clone();
            tokio::spawn(async move {
                for day in days.iter().rev() {
                    let _ = storage.delete(&format!("{}/IMG_a.jpg", day)).await;
                }
            })
        };

        let outcome = storage.cleanup(7, now).await.unwrap();
        deleter.await.unwrap();

        assert!(outcome.deleted_count <= days.len());
        assert!(storage.day_dirs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn day_locks_are_released_after_use() {
        let (_dir, storage) = storage().await;
        put(&storage, "2024-05-01/IMG_a.jpg");

        for i in 0..500 {
            let missing = format!("bogus{}/x.jpg", i);
            assert!(matches!(
                storage.delete(&missing).await,
                Err(AppError::NotFound(_))
            ));
        }
        storage.delete("2024-05-01/IMG_a.jpg").await.unwrap();
        storage
            .delete_many(&[json!("2024-05-02/IMG_gone.jpg")])
            .await;

        assert_eq!(storage.locked_days(), 0);
    }

    #[tokio::test]
    async fn contended_day_lock_stays_until_last_holder() {
        let (_dir, storage) = storage().await;

        let first = storage.lock_day("2024-05-01").await;
        let waiter = {
            let storage = storage.clone();
            tokio::spawn(async move {
                let _guard = storage.lock_day("2024-05-01").await;
            })
        };
        tokio::task::yield_now().await;

        drop(first);
        assert_eq!(storage.locked_days(), 1);

        waiter.await.unwrap();
        assert_eq!(storage.locked_days(), 0);
    }

    #[tokio::test]
    async fn cleanup_keeps_directory_with_foreign_files() {
        let (_dir, storage) = storage().await;
        let now = Local::now();
        let old = (now - Duration::days(30)).format("%Y-%m-%d").to_string();

        put(&storage, &format!("{}/IMG_1.jpg", old));
        std::fs::write(storage.base_path.join(&old).join("notes.txt"), "keep").unwrap();

        let outcome = storage.cleanup(7, now).await.unwrap();

        assert_eq!(outcome.deleted_count, 1);
        assert!(storage.base_path.join(&old).join("notes.txt").exists());
    }
}
