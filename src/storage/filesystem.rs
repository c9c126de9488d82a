use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Local, NaiveTime};
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
};

use crate::{
    error::{AppError, Result},
    models::{ImageEntry, StatsResponse, StoredImage, round2},
    storage::paths,
};

const JPEG_MAGIC: [u8; 2] = [0xFF, 0xD8];
const FALLBACK_TIME: &str = "00:00:00";

type DayLocks = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Clone)]
pub struct FileStorage {
    pub base_path: PathBuf,
    day_locks: DayLocks,
}

#[derive(Debug)]
pub struct DayListing {
    pub day: String,
    pub images: Vec<ImageEntry>,
}

impl FileStorage {
    pub async fn new(base_path: &str) -> Result<Self> {
        let path = PathBuf::from(base_path);
        fs::create_dir_all(&path).await?;
        let path = fs::canonicalize(&path).await?;

        Ok(Self {
            base_path: path,
            day_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Serializes work on one day directory across ingest and retention.
    /// The entry for `day` is dropped again once no task holds or awaits it.
    pub(crate) async fn lock_day(&self, day: &str) -> DayGuard {
        let lock = {
            let mut locks = self.day_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(day.to_string()).or_default().clone()
        };

        DayGuard {
            day: day.to_string(),
            locks: self.day_locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    pub(crate) fn locked_days(&self) -> usize {
        self.day_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub async fn ingest(
        &self,
        data: &[u8],
        max_size: usize,
        now: DateTime<Local>,
    ) -> Result<StoredImage> {
        validate_payload(data, max_size)?;

        let day = now.format("%Y-%m-%d").to_string();
        let stamp = now.format("%Y-%m-%d_%H-%M-%S").to_string();
        let _guard = self.lock_day(&day).await;

        let day_dir = self.base_path.join(&day);
        fs::create_dir_all(&day_dir).await?;

        let mut counter = 0u32;
        let (filename, mut file) = loop {
            let filename = if counter == 0 {
                format!("IMG_{}.jpg", stamp)
            } else {
                format!("IMG_{}_{}.jpg", stamp, counter)
            };

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(day_dir.join(&filename))
                .await
            {
                Ok(file) => break (filename, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => counter += 1,
                Err(e) => return Err(AppError::Io(e)),
            }
        };

        file.write_all(data).await?;
        file.sync_all().await?;

        tracing::debug!("Wrote {} bytes to {}/{}", data.len(), day, filename);

        Ok(StoredImage {
            path: format!("{}/{}", day, filename),
            filename,
            date: day,
            time: now.format("%H:%M:%S").to_string(),
            size: data.len() as u64,
        })
    }

    pub async fn open(&self, requested: &str) -> Result<(fs::File, u64)> {
        let path = paths::resolve(&self.base_path, requested).await?;

        let metadata = match fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(AppError::NotFound(requested.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(requested.to_string()));
            }
            Err(e) => return Err(AppError::Io(e)),
        };

        let file = fs::File::open(&path).await?;
        Ok((file, metadata.len()))
    }

    pub async fn list(&self) -> Result<Vec<DayListing>> {
        let mut listings = Vec::new();

        for day in self.day_dirs().await?.into_iter().rev() {
            let mut images = Vec::new();

            for (filename, size) in jpg_files(&self.base_path.join(&day)).await?.into_iter().rev() {
                images.push(ImageEntry {
                    path: format!("{}/{}", day, filename),
                    time: time_from_filename(&filename),
                    filename,
                    size,
                    date: day.clone(),
                });
            }

            if !images.is_empty() {
                listings.push(DayListing { day, images });
            }
        }

        Ok(listings)
    }

    pub async fn stats(&self) -> Result<StatsResponse> {
        let mut total_images = 0u64;
        let mut total_size = 0u64;
        let mut days = Vec::new();

        for day in self.day_dirs().await? {
            let images = jpg_files(&self.base_path.join(&day)).await?;
            if images.is_empty() {
                continue;
            }

            total_images += images.len() as u64;
            total_size += images.iter().map(|(_, size)| size).sum::<u64>();
            days.push(day);
        }

        Ok(StatsResponse {
            total_images,
            total_size_mb: round2(total_size as f64 / (1024.0 * 1024.0)),
            total_days: days.len(),
            first_date: days.iter().min().cloned(),
            last_date: days.iter().max().cloned(),
        })
    }

    pub(crate) async fn day_dirs(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.base_path).await?;
        let mut days = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_dir() => days.push(name),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(AppError::Io(e)),
            }
        }

        days.sort();
        Ok(days)
    }

    pub(crate) async fn remove_if_empty(&self, dir: &Path) -> Result<bool> {
        if dir == self.base_path || !dir.starts_with(&self.base_path) {
            return Ok(false);
        }

        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(AppError::Io(e)),
        };

        if entries.next_entry().await?.is_some() {
            return Ok(false);
        }

        match fs::remove_dir(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(AppError::Io(e)),
        }
        tracing::debug!("Removed empty directory {}", dir.display());
        Ok(true)
    }
}

pub(crate) struct DayGuard {
    day: String,
    locks: DayLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DayGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();

        // Waiters hold a clone, so a count of one means the map owns the last reference.
        if locks.get(&self.day).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.day);
        }
    }
}

pub fn validate_payload(data: &[u8], max_size: usize) -> Result<()> {
    if data.is_empty() {
        return Err(AppError::Validation("No image data".to_string()));
    }

    if data.len() > max_size {
        return Err(AppError::PayloadTooLarge(max_size));
    }

    if data.len() < 3 || data[..2] != JPEG_MAGIC {
        return Err(AppError::Validation(
            "Invalid format, JPEG required".to_string(),
        ));
    }

    Ok(())
}

/// `*.jpg` regular files of `dir` as (name, size), sorted by name.
/// A directory removed while being read yields no files.
pub(crate) async fn jpg_files(dir: &Path) -> Result<Vec<(String, u64)>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AppError::Io(e)),
    };
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".jpg") {
            continue;
        }

        match entry.metadata().await {
            Ok(m) if m.is_file() => files.push((name, m.len())),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Skipping {}: {}", name, e),
        }
    }

    files.sort();
    Ok(files)
}

pub fn time_from_filename(filename: &str) -> String {
    filename
        .strip_suffix(".jpg")
        .and_then(|stem| stem.split('_').nth(2))
        .and_then(|segment| NaiveTime::parse_from_str(segment, "%H-%M-%S").ok())
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| FALLBACK_TIME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MAX: usize = 10 * 1024 * 1024;

    fn jpeg(len: usize) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF];
        data.resize(len.max(3), 0xAB);
        data
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    async fn storage() -> (tempfile::TempDir, FileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_str().unwrap()).await.unwrap();
        (dir, storage)
    }

    #[test]
    fn rejects_empty_and_non_jpeg_payloads() {
        assert!(matches!(
            validate_payload(&[], MAX),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            validate_payload(b"\x89PNG\r\n", MAX),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            validate_payload(&[0xFF, 0xD8], MAX),
            Err(AppError::Validation(_))
        ));
        assert!(validate_payload(&jpeg(16), MAX).is_ok());
    }

    #[test]
    fn rejects_oversized_payloads() {
        assert!(matches!(
            validate_payload(&jpeg(65), 64),
            Err(AppError::PayloadTooLarge(64))
        ));
        assert!(validate_payload(&jpeg(64), 64).is_ok());
    }

    #[test]
    fn derives_time_from_filename() {
        assert_eq!(time_from_filename("IMG_2024-05-01_12-30-45.jpg"), "12:30:45");
        assert_eq!(time_from_filename("IMG_2024-05-01_12-30-45_2.jpg"), "12:30:45");
        assert_eq!(time_from_filename("holiday.jpg"), "00:00:00");
        assert_eq!(time_from_filename("IMG_2024-05-01_noon.jpg"), "00:00:00");
    }

    #[tokio::test]
    async fn ingest_writes_into_day_directory() {
        let (_dir, storage) = storage().await;
        let data = jpeg(2048);

        let image = storage
            .ingest(&data, MAX, at(2024, 5, 1, 7, 8, 9))
            .await
            .unwrap();

        assert_eq!(image.filename, "IMG_2024-05-01_07-08-09.jpg");
        assert_eq!(image.path, "2024-05-01/IMG_2024-05-01_07-08-09.jpg");
        assert_eq!(image.time, "07:08:09");
        assert_eq!(image.size_kb(), 2.0);

        let written = std::fs::read(storage.base_path.join(&image.path)).unwrap();
        assert_eq!(written, data);
    }

    #[tokio::test]
    async fn same_second_uploads_get_suffixes() {
        let (_dir, storage) = storage().await;
        let now = at(2024, 5, 1, 7, 8, 9);

        let first = storage.ingest(&jpeg(10), MAX, now).await.unwrap();
        let second = storage.ingest(&jpeg(20), MAX, now).await.unwrap();
        let third = storage.ingest(&jpeg(30), MAX, now).await.unwrap();

        assert_eq!(first.filename, "IMG_2024-05-01_07-08-09.jpg");
        assert_eq!(second.filename, "IMG_2024-05-01_07-08-09_1.jpg");
        assert_eq!(third.filename, "IMG_2024-05-01_07-08-09_2.jpg");

        let first_len = std::fs::metadata(storage.base_path.join(&first.path)).unwrap().len();
        assert_eq!(first_len, 10);
    }

    #[tokio::test]
    async fn concurrent_same_second_uploads_never_overwrite() {
        let (_dir, storage) = storage().await;
        let now = at(2024, 5, 2, 8, 0, 0);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.ingest(&jpeg(100 + i), MAX, now).await })
            })
            .collect();

        let mut names = Vec::new();
        for task in tasks {
            names.push(task.await.unwrap().unwrap().filename);
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 8);
    }

    #[tokio::test]
    async fn invalid_payload_writes_nothing() {
        let (_dir, storage) = storage().await;
        let result = storage
            .ingest(b"GIF89a....", MAX, at(2024, 5, 1, 0, 0, 0))
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(storage.day_dirs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_newest_first_and_skips_empty_days() {
        let (_dir, storage) = storage().await;
        storage.ingest(&jpeg(10), MAX, at(2024, 5, 1, 9, 0, 0)).await.unwrap();
        storage.ingest(&jpeg(10), MAX, at(2024, 5, 1, 10, 0, 0)).await.unwrap();
        storage.ingest(&jpeg(10), MAX, at(2024, 5, 3, 8, 0, 0)).await.unwrap();
        std::fs::create_dir(storage.base_path.join("2024-05-02")).unwrap();
        std::fs::create_dir(storage.base_path.join(".thumbnails")).unwrap();

        let listing = storage.list().await.unwrap();
        let days: Vec<&str> = listing.iter().map(|d| d.day.as_str()).collect();
        assert_eq!(days, ["2024-05-03", "2024-05-01"]);

        let times: Vec<&str> = listing[1].images.iter().map(|i| i.time.as_str()).collect();
        assert_eq!(times, ["10:00:00", "09:00:00"]);
    }

    #[tokio::test]
    async fn stats_cover_days_with_images() {
        let (_dir, storage) = storage().await;
        storage.ingest(&jpeg(1024 * 1024), MAX, at(2024, 4, 30, 9, 0, 0)).await.unwrap();
        storage.ingest(&jpeg(1024 * 1024), MAX, at(2024, 5, 1, 9, 0, 0)).await.unwrap();
        std::fs::create_dir(storage.base_path.join("2024-01-01")).unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(
            stats,
            StatsResponse {
                total_images: 2,
                total_size_mb: 2.0,
                total_days: 2,
                first_date: Some("2024-04-30".to_string()),
                last_date: Some("2024-05-01".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn stats_of_empty_store() {
        let (_dir, storage) = storage().await;
        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.total_images, 0);
        assert_eq!(stats.first_date, None);
        assert_eq!(stats.last_date, None);
    }
}
