use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Errors raised by the photo submission and moderation workflow
#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("{0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Photo {0} not found")]
    NotFound(Uuid),

    #[error("Failed to write object {key}: {message}")]
    StorageWrite { key: String, message: String },

    #[error("Failed to move object {from} to {to}: {message}")]
    StorageMove {
        from: String,
        to: String,
        message: String,
    },

    #[error("Failed to delete object {key}: {message}")]
    StorageDelete { key: String, message: String },

    #[error("Failed to write photo record: {0}")]
    RecordWrite(String),

    #[error("Failed to read photo records: {0}")]
    RecordRead(String),

    #[error("Failed to send notification to {to}: {message}")]
    Notification { to: String, message: String },
}

pub type Result<T, E = GalleryError> = std::result::Result<T, E>;

impl GalleryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StorageWrite { .. }
            | Self::StorageMove { .. }
            | Self::StorageDelete { .. }
            | Self::RecordWrite(_)
            | Self::RecordRead(_)
            | Self::Notification { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients; backend faults are not echoed.
    fn public_message(&self) -> String {
        match self {
            Self::Validation(_) | Self::Unauthorized(_) | Self::NotFound(_) => self.to_string(),
            Self::StorageWrite { .. } => "Failed to store image".to_string(),
            Self::StorageMove { .. } | Self::StorageDelete { .. } => {
                "Failed to update stored image".to_string()
            }
            Self::RecordWrite(_) | Self::RecordRead(_) => "Database error".to_string(),
            Self::Notification { .. } => "Notification error".to_string(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for GalleryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.public_message(),
            }),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for GalleryError {
    fn from(e: sqlx::Error) -> Self {
        Self::RecordRead(e.to_string())
    }
}
