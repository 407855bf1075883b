//! Directory endpoints.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::auth::Authorized;
use super::error::ApiError;
use super::AppState;
use crate::files::ListingEntry;

/// The `key` query parameter: a path relative to the capability directory.
#[derive(Debug, Default, Deserialize)]
pub struct KeyQuery {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct ListingResponse {
    #[serde(rename = "queryFolder")]
    pub query_folder: String,
    pub metadatas: Vec<ListingEntry>,
}

/// `GET /dir?key=`
pub async fn list(
    State(state): State<AppState>,
    Authorized(capability): Authorized,
    Query(query): Query<KeyQuery>,
) -> Result<Json<ListingResponse>, ApiError> {
    let path = capability.check_read(&query.key)?;

    let browser = state.browser.clone();
    let full = path.clone();
    let entries = tokio::task::spawn_blocking(move || browser.list(&full)).await??;

    info!(
        "Listed {} ({} entries) for {}",
        path.display(),
        entries.len(),
        capability.id()
    );
    Ok(Json(ListingResponse {
        query_folder: query.key,
        metadatas: entries.iter().map(|e| e.to_listing()).collect(),
    }))
}

/// `POST /dir?key=`
pub async fn create(
    State(state): State<AppState>,
    Authorized(capability): Authorized,
    Query(query): Query<KeyQuery>,
) -> Result<String, ApiError> {
    let path = capability.check_write(&query.key)?;

    let browser = state.browser.clone();
    tokio::task::spawn_blocking(move || browser.create_dir(&path)).await??;

    Ok(query.key)
}

/// `DELETE /dir?key=`
pub async fn remove(
    State(state): State<AppState>,
    Authorized(capability): Authorized,
    Query(query): Query<KeyQuery>,
) -> Result<String, ApiError> {
    let path = capability.check_delete(&query.key)?;

    let browser = state.browser.clone();
    tokio::task::spawn_blocking(move || browser.remove(&path)).await??;

    info!("Deleted {:?} for {}", query.key, capability.id());
    Ok(query.key)
}
