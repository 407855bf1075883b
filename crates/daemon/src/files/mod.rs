//! Filesystem operations behind the HTTP surface.
//!
//! This module provides:
//! - Directory listing, creation and removal under the public root
//! - Chunked, cancelable upload writes
//! - Zip packaging for batch downloads
//!
//! # Security
//!
//! Callers resolve request paths through a capability first. The browser
//! then canonicalizes existing paths and rejects anything, including
//! symlink targets, that resolves outside the public root.

pub mod archive;
pub mod browser;
pub mod upload;

pub use archive::{remove_ephemeral, ArchiveError, ArchivePackager};
pub use browser::{BrowserError, DirectoryBrowser, DirectoryEntry, ListingEntry};
pub use upload::{store_upload, ReadAt, UploadError, UploadWriter};
