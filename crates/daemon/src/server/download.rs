//! Download endpoints.
//!
//! Downloads are two-step. An authenticated `POST` exchanges a path for a
//! single-use signed link; a plain `GET` with that link streams the file.
//! Batch requests are zipped first and served as an ephemeral archive.

use std::path::PathBuf;

use access::{confine, Ticket, TicketKind};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use super::auth::Authorized;
use super::dir::KeyQuery;
use super::error::ApiError;
use super::AppState;
use crate::files::{remove_ephemeral, BrowserError};

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FetchQuery {
    #[serde(default)]
    pub signed: String,
    #[serde(default)]
    pub nc: String,
}

/// `POST /download?key=`: sign a link for one file.
pub async fn sign(
    State(state): State<AppState>,
    Authorized(capability): Authorized,
    Query(query): Query<KeyQuery>,
) -> Result<Json<access::SignedLink>, ApiError> {
    let path = capability.check_read(&query.key)?;

    let browser = state.browser.clone();
    let (file_path, _) = tokio::task::spawn_blocking(move || browser.file_entry(&path)).await??;

    let ticket = Ticket::new(
        capability.id(),
        &file_path,
        capability.expires_at(),
        TicketKind::Regular,
    );
    let link = state.signer.issue(&ticket).map_err(|e| {
        error!("Failed to sign {}: {}", file_path.display(), e);
        ApiError::Internal
    })?;

    info!("Signed {} for {}", file_path.display(), capability.id());
    Ok(Json(link))
}

/// `POST /download/batch`: package several paths and sign a link to the archive.
pub async fn sign_batch(
    State(state): State<AppState>,
    Authorized(capability): Authorized,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<access::SignedLink>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(format!("Invalid input: {e}")))?;
    if request.keys.is_empty() {
        return Err(ApiError::BadRequest("No files requested".to_string()));
    }
    let paths = request
        .keys
        .iter()
        .map(|key| capability.check_read(key))
        .collect::<Result<Vec<_>, _>>()?;

    let browser = state.browser.clone();
    let packager = state.packager.clone();
    let archive = tokio::task::spawn_blocking(move || -> Result<PathBuf, ApiError> {
        let resolved = paths
            .iter()
            .map(|path| browser.validate_path(path))
            .collect::<Result<Vec<_>, BrowserError>>()?;
        Ok(packager.package(&resolved)?)
    })
    .await??;

    let ticket = Ticket::new(
        capability.id(),
        &archive,
        capability.expires_at(),
        TicketKind::EphemeralArchive,
    );
    match state.signer.issue(&ticket) {
        Ok(link) => {
            info!(
                "Signed archive {} of {} paths for {}",
                archive.display(),
                request.keys.len(),
                capability.id()
            );
            Ok(Json(link))
        }
        Err(e) => {
            error!("Failed to sign {}: {}", archive.display(), e);
            remove_ephemeral(state.packager.temp_root(), &archive);
            Err(ApiError::Internal)
        }
    }
}

/// `GET /download?signed=&nc=`: redeem a link and stream the file.
pub async fn fetch(
    State(state): State<AppState>,
    Query(query): Query<FetchQuery>,
) -> Result<Response, ApiError> {
    let ticket = state.signer.redeem(&query.signed, &query.nc).map_err(|e| {
        debug!("Signed key rejected: {}", e);
        info!("Invalid signed key");
        ApiError::InvalidSignedKey
    })?;

    let path = match ticket.kind {
        TicketKind::Regular => {
            let browser = state.browser.clone();
            let path = ticket.file_path.clone();
            tokio::task::spawn_blocking(move || browser.file_entry(&path))
                .await?
                .map(|(resolved, _)| resolved)
                .map_err(|e| {
                    info!("File {} is gone: {}", ticket.file_path.display(), e);
                    ApiError::NotFound("File does not exist")
                })?
        }
        TicketKind::EphemeralArchive => {
            if !confine::is_inclusive_strict(state.packager.temp_root(), &ticket.file_path) {
                error!(
                    "Archive ticket points outside the temp root: {}",
                    ticket.file_path.display()
                );
                return Err(ApiError::NotFound("File does not exist"));
            }
            ticket.file_path.clone()
        }
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            info!("File {} does not exist: {}", path.display(), e);
            return Err(ApiError::NotFound("File does not exist"));
        }
    };
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(ApiError::NotFound("File does not exist"));
    }

    // The open handle keeps the archive readable after it is unlinked.
    if ticket.kind == TicketKind::EphemeralArchive {
        let temp_root = state.packager.temp_root().to_path_buf();
        let archive = path.clone();
        tokio::task::spawn_blocking(move || remove_ephemeral(&temp_root, &archive)).await?;
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_default();
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_bytes(format!("attachment; filename=\"{name}\"").as_bytes())
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    info!("Serving {} ({} bytes)", path.display(), metadata.len());
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
