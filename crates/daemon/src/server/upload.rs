//! Upload endpoint.
//!
//! The multipart body is spooled to a temp file first, then copied into
//! place by the chunked writer on the blocking pool. If the client goes away
//! the handler future is dropped, the drop guard cancels the writer, and the
//! partial destination is removed at the next part boundary.

use std::path::{Path, PathBuf};

use access::confine;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::auth::Authorized;
use super::dir::KeyQuery;
use super::error::ApiError;
use super::AppState;
use crate::files::{store_upload, BrowserError, UploadWriter};

/// Multipart field carrying the file.
pub const UPLOAD_FIELD: &str = "uploadFile";

/// Longest accepted file name, in bytes.
pub const MAX_FILE_NAME_LENGTH: usize = 250;

/// `POST /upload?key=`: store one file into the directory named by `key`.
pub async fn upload(
    State(state): State<AppState>,
    Authorized(capability): Authorized,
    Query(query): Query<KeyQuery>,
    mut multipart: Multipart,
) -> Result<String, ApiError> {
    let target = capability.check_write(&query.key)?;
    let max_size = state.config.storage.max_upload_size;

    let browser = state.browser.clone();
    let target_dir = tokio::task::spawn_blocking(move || -> Result<PathBuf, BrowserError> {
        let dir = browser.validate_path(&target)?;
        if !dir.is_dir() {
            return Err(BrowserError::NotADirectory(target));
        }
        Ok(dir)
    })
    .await??;

    let mut field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max_size))?
        {
            Some(field) if field.name() == Some(UPLOAD_FIELD) => break field,
            Some(_) => continue,
            None => return Err(ApiError::BadRequest("Invalid file".to_string())),
        }
    };

    let file_name = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("Invalid file".to_string()))?;
    validate_file_name(&file_name)?;

    let dest = confine::join(&target_dir, Path::new(&file_name));
    if !confine::is_inclusive_strict(&target_dir, &dest) {
        return Err(ApiError::BadRequest("Invalid file name".to_string()));
    }
    if tokio::fs::symlink_metadata(&dest).await.is_ok() {
        info!("Upload rejected, {} already exists", dest.display());
        return Err(ApiError::Conflict("File already exists"));
    }

    let spool = NamedTempFile::new_in(state.packager.temp_root())?;
    let mut out = tokio::fs::File::from_std(spool.reopen()?);
    let mut size = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, max_size))?
    {
        size += chunk.len() as u64;
        if size > max_size {
            return Err(ApiError::PayloadTooLarge(max_size));
        }
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    drop(out);

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let part_size = state.config.storage.part_size;
    let destination = dest.clone();
    let written = tokio::task::spawn_blocking(move || {
        let writer = UploadWriter::new(spool.as_file(), size, part_size, cancel)?;
        store_upload(&writer, &destination)
    })
    .await??;

    info!(
        "Uploaded {} ({} bytes) for {}",
        dest.display(),
        written,
        capability.id()
    );
    Ok(query.key)
}

fn validate_file_name(name: &str) -> Result<(), ApiError> {
    if name.len() > MAX_FILE_NAME_LENGTH {
        return Err(ApiError::BadRequest("File name too long".to_string()));
    }
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(ApiError::BadRequest("Invalid file name".to_string()));
    }
    Ok(())
}

fn multipart_error(error: MultipartError, max_size: u64) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(max_size)
    } else {
        ApiError::BadRequest(format!("Invalid file: {}", error.body_text()))
    }
}
