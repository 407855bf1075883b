//! HTTP error mapping.

use access::{AccessError, ErrorKind};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::files::{ArchiveError, BrowserError, UploadError};

/// A request failure, rendered as a status code and a short plain-text body.
///
/// The body never carries internal detail; the underlying error is logged.
#[derive(Debug)]
pub enum ApiError {
    InvalidToken,
    TokenExpired,
    InvalidSignedKey,
    Forbidden,
    NotFound(&'static str),
    Conflict(&'static str),
    BadRequest(String),
    PayloadTooLarge(u64),
    Internal,
}

impl ApiError {
    /// Map an error classification onto the response vocabulary.
    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Malformed => ApiError::InvalidToken,
            ErrorKind::Expired => ApiError::TokenExpired,
            ErrorKind::NoPermission => ApiError::Forbidden,
            ErrorKind::NotFound => ApiError::NotFound("Not found"),
            ErrorKind::Conflict => ApiError::Conflict("Already exists"),
            ErrorKind::Canceled => ApiError::BadRequest("Request canceled".to_string()),
            ErrorKind::Io | ErrorKind::Integrity => ApiError::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidToken | ApiError::TokenExpired | ApiError::InvalidSignedKey => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::InvalidToken => "Invalid token".to_string(),
            ApiError::TokenExpired => "Token expired".to_string(),
            ApiError::InvalidSignedKey => "Invalid signed key".to_string(),
            ApiError::Forbidden => "No permission".to_string(),
            ApiError::NotFound(msg) | ApiError::Conflict(msg) => msg.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::PayloadTooLarge(limit) => format!("File larger than {limit} bytes"),
            ApiError::Internal => "Internal error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.message()).into_response()
    }
}

impl From<AccessError> for ApiError {
    fn from(error: AccessError) -> Self {
        ApiError::from_kind(error.kind())
    }
}

impl From<BrowserError> for ApiError {
    fn from(error: BrowserError) -> Self {
        match &error {
            BrowserError::PathNotFound(_) => ApiError::NotFound("Path does not exist"),
            BrowserError::AlreadyExists(_) => ApiError::Conflict("Path already exists"),
            BrowserError::NotADirectory(_) => ApiError::BadRequest("Not a directory".to_string()),
            BrowserError::NotAFile(_) => ApiError::NotFound("File does not exist"),
            BrowserError::InvalidName(_) => ApiError::BadRequest("Invalid file name".to_string()),
            BrowserError::Io(e) => {
                error!("Filesystem error: {}", e);
                ApiError::Internal
            }
            BrowserError::PathOutsideBoundary(_) | BrowserError::RootNotRemovable => {
                ApiError::from_kind(error.kind())
            }
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(error: UploadError) -> Self {
        match &error {
            UploadError::AlreadyExists(_) => ApiError::Conflict("File already exists"),
            UploadError::Canceled { .. } => ApiError::from_kind(error.kind()),
            _ => {
                error!("Upload failed: {}", error);
                ApiError::Internal
            }
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(error: ArchiveError) -> Self {
        match &error {
            ArchiveError::NotFound(_) => ApiError::NotFound("File does not exist"),
            ArchiveError::Empty => ApiError::BadRequest("No files requested".to_string()),
            _ => {
                error!("Packaging failed: {}", error);
                ApiError::Internal
            }
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(error: std::io::Error) -> Self {
        error!("IO error: {}", error);
        ApiError::Internal
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(error: tokio::task::JoinError) -> Self {
        error!("Blocking task failed: {}", error);
        ApiError::Internal
    }
}
