use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, header},
    response::Response,
};
use chrono::Local;
use futures_util::StreamExt;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::{
    auth::ClientAddr,
    cleanup::run_cleanup,
    error::{AppError, Result},
    handlers::{AppState, report},
    models::{
        BulkDeleteResponse, CleanupResponse, DeleteResponse, EventType, ImageRecord,
        UploadResponse,
    },
    storage::retention::{MAX_BULK_DELETE, clamp_days},
};

/// Receives one JPEG pushed by the camera as the raw request body.
pub async fn upload(
    State(state): State<AppState>,
    Extension(ClientAddr(address)): Extension<ClientAddr>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>> {
    tracing::info!("Upload from {}", address);
    let max_size = state.max_upload_size;

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(length) = declared {
        if length > max_size {
            return Err(upload_rejected(&state, &address, AppError::PayloadTooLarge(max_size)).await);
        }
    }

    let data = match read_body(body, max_size).await {
        Ok(data) => data,
        Err(e) => return Err(upload_rejected(&state, &address, e).await),
    };

    let now = Local::now();
    let image = match state.storage.ingest(&data, max_size, now).await {
        Ok(image) => image,
        Err(e) => return Err(upload_rejected(&state, &address, e).await),
    };

    let record = ImageRecord {
        id: Uuid::new_v4().to_string(),
        path: image.path.clone(),
        day: image.date.clone(),
        filename: image.filename.clone(),
        size: image.size as i64,
        etag: hex::encode(Sha256::digest(&data)),
        source_ip: address.clone(),
        captured_at: now,
    };
    if let Err(e) = state.metadata.insert(&record).await {
        tracing::warn!("Could not index {}: {}", image.path, e);
    }

    state
        .events
        .record(
            EventType::Upload,
            format!("Photo received: {}", image.filename),
            json!({
                "filename": image.filename,
                "date": image.date,
                "time": image.time,
                "size_kb": image.size_kb(),
                "path": image.path,
                "source_ip": address,
            }),
        )
        .await;

    Ok(Json(UploadResponse {
        success: true,
        size_kb: image.size_kb(),
        filename: image.filename,
        path: image.path,
    }))
}

/// Upload rejections are all kept in the event log, not only internal ones.
async fn upload_rejected(state: &AppState, address: &str, err: AppError) -> AppError {
    if err.is_internal() {
        return report(state, address, "upload", err).await;
    }

    state
        .events
        .record(EventType::Error, err.to_string(), json!({ "ip": address }))
        .await;
    err
}

async fn read_body(body: Body, max_size: usize) -> Result<Vec<u8>> {
    let mut stream = body.into_data_stream();
    let mut data = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| AppError::Validation(format!("Failed to read body: {}", e)))?;

        if data.len() + chunk.len() > max_size {
            return Err(AppError::PayloadTooLarge(max_size));
        }
        data.extend_from_slice(&chunk);
    }

    Ok(data)
}

/// Stored images grouped by day, newest day first.
pub async fn list_images(State(state): State<AppState>) -> Result<Json<Map<String, Value>>> {
    tracing::info!("LIST request for images");

    let listings = state.storage.list().await?;
    let mut by_day = Map::new();

    for mut listing in listings {
        let times = state
            .metadata
            .times_for_day(&listing.day)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Image index unavailable for {}: {}", listing.day, e);
                Default::default()
            });

        for image in &mut listing.images {
            if let Some(time) = times.get(&image.filename) {
                image.time = time.clone();
            }
        }

        by_day.insert(listing.day, json!(listing.images));
    }

    tracing::debug!("Listed {} days", by_day.len());
    Ok(Json(by_day))
}

pub async fn serve_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response> {
    tracing::info!("GET request for image: {}", path);

    let (file, size) = state.storage.open(&path).await?;

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CONTENT_LENGTH, size.to_string());

    if let Ok(Some(record)) = state.metadata.get(&path).await {
        builder = builder.header(header::ETAG, format!("\"{}\"", record.etag));
    }

    builder
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| {
            tracing::error!("Failed to build image response: {}", e);
            AppError::Internal
        })
}

pub async fn delete_image(
    State(state): State<AppState>,
    Extension(ClientAddr(address)): Extension<ClientAddr>,
    Path(path): Path<String>,
) -> Result<Json<DeleteResponse>> {
    tracing::info!("DELETE request for image: {}", path);

    let key = match state.storage.delete(&path).await {
        Ok(key) => key,
        Err(e) => return Err(report(&state, &address, "delete", e).await),
    };

    if let Err(e) = state.metadata.delete(&key).await {
        tracing::warn!("Could not drop index entry for {}: {}", key, e);
    }

    state
        .events
        .record(
            EventType::Delete,
            format!("Image deleted: {}", path),
            json!({ "filename": path, "ip": address }),
        )
        .await;

    Ok(Json(DeleteResponse {
        success: true,
        deleted: path,
    }))
}

pub async fn delete_multiple(
    State(state): State<AppState>,
    Extension(ClientAddr(address)): Extension<ClientAddr>,
    body: Bytes,
) -> Result<Json<BulkDeleteResponse>> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::Validation("JSON body required".to_string()))?;

    let paths = match payload.get("paths").and_then(Value::as_array) {
        Some(paths) if !paths.is_empty() => paths,
        _ => return Err(AppError::Validation("A list of paths is required".to_string())),
    };

    if paths.len() > MAX_BULK_DELETE {
        return Err(AppError::Validation(format!(
            "At most {} images per request",
            MAX_BULK_DELETE
        )));
    }

    tracing::info!("Bulk DELETE request for {} images", paths.len());

    let outcome = state.storage.delete_many(paths).await;

    for key in &outcome.keys {
        if let Err(e) = state.metadata.delete(key).await {
            tracing::warn!("Could not drop index entry for {}: {}", key, e);
        }
    }

    state
        .events
        .record(
            EventType::DeleteMultiple,
            format!("{} image(s) deleted", outcome.deleted.len()),
            json!({
                "deleted_count": outcome.deleted.len(),
                "error_count": outcome.errors.len(),
                "ip": address,
            }),
        )
        .await;

    Ok(Json(BulkDeleteResponse {
        success: true,
        deleted_count: outcome.deleted.len(),
        error_count: outcome.errors.len(),
        deleted: outcome.deleted,
        errors: outcome.errors,
    }))
}

pub async fn cleanup(
    State(state): State<AppState>,
    Extension(ClientAddr(address)): Extension<ClientAddr>,
    body: Bytes,
) -> Result<Json<CleanupResponse>> {
    let days = clamp_days(requested_days(&body)?);

    tracing::info!("CLEANUP request for images older than {} days", days);

    let outcome = match run_cleanup(&state, days, Some(&address)).await {
        Ok(outcome) => outcome,
        Err(e) => return Err(report(&state, &address, "cleanup", e).await),
    };

    Ok(Json(CleanupResponse {
        success: true,
        deleted_count: outcome.deleted_count,
        days_threshold: days,
    }))
}

/// `days` from an optional `{"days": N}` body. An empty body or a missing key
/// yields `None`; anything other than a whole number is rejected.
fn requested_days(body: &[u8]) -> Result<Option<i64>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|_| AppError::Validation("JSON body required".to_string()))?;
    let Value::Object(payload) = payload else {
        return Err(AppError::Validation("JSON object required".to_string()));
    };

    let Some(days) = payload.get("days") else {
        return Ok(None);
    };

    if let Some(days) = days.as_i64() {
        return Ok(Some(days));
    }

    match days.as_f64() {
        Some(days) if days.is_finite() && days.fract() == 0.0 => {
            Ok(Some(days.clamp(i64::MIN as f64, i64::MAX as f64) as i64))
        }
        _ => Err(AppError::Validation("days must be a whole number".to_string())),
    }
}
