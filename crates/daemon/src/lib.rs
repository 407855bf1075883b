//! # Sharegate Daemon Library
//!
//! This crate provides the HTTP service for Sharegate, a file-sharing
//! server where every request is scoped by a capability token.
//!
//! ## Overview
//!
//! - **Directory Browsing**: List, create and delete directories under the public root
//! - **Uploads**: Multipart uploads copied into place in cancelable parts
//! - **Downloads**: One-time signed links, with batch requests served as zip archives
//! - **Sweeper**: Periodic eviction of expired links and orphaned archives
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      axum Router                         │
//! │   /token    /dir    /upload    /download   /download/batch│
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │  TokenCodec  │  │  LinkSigner  │  │    Sweeper     │  │
//! │  └──────────────┘  └──────────────┘  └────────────────┘  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │  Directory   │  │   Upload     │  │    Archive     │  │
//! │  │   Browser    │  │   Writer     │  │    Packager    │  │
//! │  └──────────────┘  └──────────────┘  └────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{AppState, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!     config.ensure_directories()?;
//!
//!     let state = AppState::new(config)?;
//!     daemon::serve(state, CancellationToken::new()).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Directory browsing, chunked upload writing and archive packaging
//! - [`server`]: HTTP routes and error mapping
//! - [`sweeper`]: Expired-link eviction

pub mod config;
pub mod files;
pub mod server;
pub mod sweeper;

// Re-export access control for convenience
pub use access;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export files types for convenience
pub use files::{ArchivePackager, DirectoryBrowser, DirectoryEntry, UploadWriter};

// Re-export server types for convenience
pub use server::{router, serve, ApiError, AppState};
