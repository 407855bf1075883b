//! Capability authentication and token endpoints.

use access::Capability;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::error::ApiError;
use super::AppState;

/// A request carrying a valid capability token in its `Authorization` header.
#[derive(Debug, Clone)]
pub struct Authorized(pub Capability);

impl FromRequestParts<AppState> for Authorized {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::InvalidToken)?;
        let capability = state.codec.validate(token).map_err(|e| {
            info!("Rejected capability token: {}", e);
            ApiError::from(e)
        })?;
        Ok(Authorized(capability))
    }
}

/// Extract the credential from `Authorization: Bearer <credential>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split_whitespace();
    let scheme = parts.next()?;
    let credential = parts.next()?;
    scheme.eq_ignore_ascii_case("bearer").then_some(credential)
}

/// Body of a token issuance request.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// Scope string, e.g. `r--`.
    pub mode: String,
    /// Directory relative to the public root.
    #[serde(default)]
    pub dir: String,
    /// Lifetime in minutes; the configured default when omitted.
    #[serde(default)]
    pub valid: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    pub expires_at: String,
}

/// `POST /token`: issue a capability, authenticated by the admin secret.
pub async fn issue_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<String, ApiError> {
    let admin_secret = state.config.auth.admin_secret.as_bytes();
    if admin_secret.is_empty() {
        warn!("Token issuance requested but no admin secret is configured");
        return Err(ApiError::InvalidToken);
    }
    let presented = bearer_token(&headers).ok_or(ApiError::InvalidToken)?;
    if !bool::from(presented.as_bytes().ct_eq(admin_secret)) {
        warn!("Token issuance rejected: admin secret mismatch");
        return Err(ApiError::InvalidToken);
    }

    let Json(request) = body.map_err(|e| ApiError::BadRequest(format!("Invalid input: {e}")))?;
    let valid = request
        .valid
        .unwrap_or(state.config.auth.default_valid_minutes);
    let token = state
        .codec
        .issue(&request.mode, &request.dir, valid)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    info!(
        "Issued token for dir {:?} with mode {} valid {} minutes",
        request.dir, request.mode, valid
    );
    Ok(token)
}

/// `GET /token`: describe the presented capability.
pub async fn token_info(Authorized(capability): Authorized) -> Json<TokenInfo> {
    info!("{}", capability);
    Json(TokenInfo {
        read: capability.can_read(),
        write: capability.can_write(),
        delete: capability.can_delete(),
        expires_at: format_unix_time(capability.expires_at()),
    })
}

/// Local time as `YYYY-MM-DD hh:mm:ss`.
pub fn format_unix_time(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|utc| {
            utc.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| secs.to_string())
}
