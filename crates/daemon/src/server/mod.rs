//! HTTP surface.
//!
//! Routes, mounted under the configured API prefix:
//!
//! | Method | Path              | Auth            |
//! |--------|-------------------|-----------------|
//! | POST   | `/token`          | admin secret    |
//! | GET    | `/token`          | capability      |
//! | GET    | `/dir`            | capability (r)  |
//! | POST   | `/dir`            | capability (w)  |
//! | DELETE | `/dir`            | capability (d)  |
//! | POST   | `/upload`         | capability (w)  |
//! | POST   | `/download`       | capability (r)  |
//! | POST   | `/download/batch` | capability (r)  |
//! | GET    | `/download`       | signed link     |

pub mod auth;
pub mod dir;
pub mod download;
pub mod error;
pub mod upload;

use std::sync::Arc;
use std::time::Duration;

use access::{confine, LinkSigner, TokenCodec};
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::files::{ArchivePackager, DirectoryBrowser};
use crate::sweeper::spawn_sweeper;

pub use error::ApiError;

/// Room for multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub codec: Arc<TokenCodec>,
    pub signer: Arc<LinkSigner>,
    pub browser: Arc<DirectoryBrowser>,
    pub packager: Arc<ArchivePackager>,
}

impl AppState {
    /// Build the state from a validated configuration.
    ///
    /// Both storage roots must already exist.
    pub fn new(config: Config) -> Result<Self> {
        let browser = DirectoryBrowser::new(&config.storage.public_root).with_context(|| {
            format!(
                "Invalid public root: {}",
                config.storage.public_root.display()
            )
        })?;
        let temp_root = config
            .storage
            .temp_root
            .canonicalize()
            .with_context(|| {
                format!(
                    "Invalid temp root: {}",
                    config.storage.temp_root.display()
                )
            })?;
        if confine::is_inclusive(browser.root(), &temp_root) {
            anyhow::bail!(
                "temp_root {} must not be inside public_root {}",
                temp_root.display(),
                browser.root().display()
            );
        }

        let codec = TokenCodec::new(
            config.auth.token_secret.as_bytes(),
            config.auth.issuer.clone(),
            browser.root(),
        )
        .context("Invalid token secret")?;

        let signer = match config.auth.link_key_bytes()? {
            Some(key) => LinkSigner::new(&key).context("Invalid link key")?,
            None => {
                info!("No link key configured, signed links will not survive a restart");
                LinkSigner::generate()
            }
        };

        Ok(Self {
            config: Arc::new(config),
            codec: Arc::new(codec),
            signer: Arc::new(signer),
            browser: Arc::new(browser),
            packager: Arc::new(ArchivePackager::new(temp_root)),
        })
    }
}

/// Build the router, nested under `server.api_path`.
pub fn router(state: AppState) -> Router {
    let upload_limit = state
        .config
        .storage
        .max_upload_size
        .saturating_add(MULTIPART_OVERHEAD);
    let upload_limit = usize::try_from(upload_limit).unwrap_or(usize::MAX);
    let prefix = state
        .config
        .server
        .api_path
        .trim_end_matches('/')
        .to_string();

    let api = Router::new()
        .route("/token", post(auth::issue_token).get(auth::token_info))
        .route("/dir", get(dir::list).post(dir::create).delete(dir::remove))
        .route(
            "/upload",
            post(upload::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/download", get(download::fetch).post(download::sign))
        .route("/download/batch", post(download::sign_batch))
        .with_state(state);

    if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&prefix, api)
    }
}

/// Serve until `shutdown` is cancelled, sweeping expired links alongside.
pub async fn serve(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = state.config.server.bind_addr()?;
    let sweeper = spawn_sweeper(
        state.signer.clone(),
        state.packager.temp_root().to_path_buf(),
        Duration::from_secs(state.config.auth.sweep_interval_secs.max(1)),
        shutdown.child_token(),
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        "Listening on http://{}{}",
        listener.local_addr()?,
        state.config.server.api_path
    );

    let app = router(state);
    let token = shutdown.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("HTTP server failed");

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Link sweeper task failed: {}", e);
    }
    info!("Server stopped");
    result
}
