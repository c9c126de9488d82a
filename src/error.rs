use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Path rejected: {0}")]
    PathRejected(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Payload exceeds maximum allowed size: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal,
}

impl AppError {
    /// Failures the caller did not cause. These are reported as ERROR events
    /// and answered with a generic message.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Io(_) | AppError::Internal
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AccessDenied(_) | AppError::PathRejected(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Io(_) | AppError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::AccessDenied(reason) => format!("Access denied: {}", reason),
            AppError::PathRejected(_) => "Access denied: path not allowed".to_string(),
            AppError::RateLimited => "Too many requests, try again later".to_string(),
            AppError::Validation(reason) => reason.clone(),
            AppError::PayloadTooLarge(limit) => {
                format!("Payload exceeds maximum allowed size: {} bytes", limit)
            }
            AppError::NotFound(what) => format!("Not found: {}", what),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                "Internal server error".to_string()
            }
            AppError::Internal => "Internal server error".to_string(),
        };

        (
            status,
            Json(json!({
                "error": message,
                "code": status.as_u16(),
            })),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_rejections_answer_as_forbidden() {
        let err = AppError::PathRejected("../etc/passwd".to_string());
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(!err.is_internal());
    }

    #[test]
    fn io_failures_are_internal() {
        let err = AppError::from(std::io::Error::other("disk full"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_internal());
    }
}
