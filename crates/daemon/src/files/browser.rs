//! Directory browsing under the public root.
//!
//! Paths reaching this module have already been confined lexically by a
//! capability. The browser adds the on-disk check: existing paths are
//! canonicalized, so a symlink that points outside the public root is
//! rejected even though its lexical path looks confined.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use access::ErrorKind;
use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// `type` reported for directories in listings.
pub const FOLDER_KIND: &str = "Folder";

/// Errors that can occur during directory browsing.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The requested path resolves outside the public root.
    #[error("path is outside allowed boundaries: {0}")]
    PathOutsideBoundary(PathBuf),

    /// The requested path does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(PathBuf),

    /// The requested path is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The requested path is not a regular file.
    #[error("path is not a file: {0}")]
    NotAFile(PathBuf),

    /// The path to create already exists.
    #[error("path already exists: {0}")]
    AlreadyExists(PathBuf),

    /// The public root itself cannot be removed.
    #[error("refusing to remove the public root")]
    RootNotRemovable,

    /// Path has no usable file name.
    #[error("invalid file name: {0}")]
    InvalidName(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BrowserError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrowserError::PathOutsideBoundary(_) | BrowserError::RootNotRemovable => {
                ErrorKind::NoPermission
            }
            BrowserError::PathNotFound(_) => ErrorKind::NotFound,
            BrowserError::NotADirectory(_)
            | BrowserError::NotAFile(_)
            | BrowserError::InvalidName(_) => ErrorKind::Malformed,
            BrowserError::AlreadyExists(_) => ErrorKind::Conflict,
            BrowserError::Io(_) => ErrorKind::Io,
        }
    }
}

/// A directory entry with metadata.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    pub modified: SystemTime,
    /// `Folder` for directories, otherwise the extension without its dot.
    pub kind: String,
}

/// Wire form of a listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
    /// Local time, `YYYY-MM-DD hh:mm:ss`.
    pub date: String,
}

impl DirectoryEntry {
    fn from_metadata(name: String, metadata: &fs::Metadata) -> Self {
        let is_dir = metadata.is_dir();
        let kind = if is_dir {
            FOLDER_KIND.to_string()
        } else {
            Path::new(&name)
                .extension()
                .map(|ext| ext.to_string_lossy().to_string())
                .unwrap_or_default()
        };
        Self {
            size: if is_dir { 0 } else { metadata.len() },
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            name,
            is_dir,
            kind,
        }
    }

    /// Convert to the listing wire form.
    pub fn to_listing(&self) -> ListingEntry {
        let date: DateTime<Local> = self.modified.into();
        ListingEntry {
            name: self.name.clone(),
            kind: self.kind.clone(),
            size: self.size,
            date: date.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Directory browser bound to the public root.
#[derive(Debug, Clone)]
pub struct DirectoryBrowser {
    /// Canonical public root.
    root: PathBuf,
}

impl DirectoryBrowser {
    /// Create a browser for an existing public root.
    pub fn new(public_root: &Path) -> Result<Self, BrowserError> {
        let root = fs::canonicalize(public_root).map_err(|e| map_io(e, public_root))?;
        if !root.is_dir() {
            return Err(BrowserError::NotADirectory(root));
        }
        Ok(Self { root })
    }

    /// The canonical public root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate that an existing path resolves within the public root.
    ///
    /// Returns the canonicalized path.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, BrowserError> {
        let canonical = fs::canonicalize(path).map_err(|e| map_io(e, path))?;
        if !canonical.starts_with(&self.root) {
            return Err(BrowserError::PathOutsideBoundary(path.to_path_buf()));
        }
        Ok(canonical)
    }

    /// Validate a path that may not exist yet.
    ///
    /// The parent directory must exist and resolve within the public root.
    pub fn validate_path_for_creation(&self, path: &Path) -> Result<PathBuf, BrowserError> {
        let parent = path
            .parent()
            .ok_or_else(|| BrowserError::InvalidName(path.display().to_string()))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| BrowserError::InvalidName(path.display().to_string()))?;

        let parent_canonical = self.validate_path(parent)?;
        if !parent_canonical.is_dir() {
            return Err(BrowserError::NotADirectory(parent.to_path_buf()));
        }
        Ok(parent_canonical.join(file_name))
    }

    /// List contents of a directory.
    ///
    /// Directories come first, then files, each sorted by name.
    pub fn list(&self, path: &Path) -> Result<Vec<DirectoryEntry>, BrowserError> {
        let canonical = self.validate_path(path)?;
        if !canonical.is_dir() {
            return Err(BrowserError::NotADirectory(path.to_path_buf()));
        }

        let mut results = Vec::new();
        for entry_result in fs::read_dir(&canonical)? {
            let entry = match entry_result {
                Ok(e) => e,
                Err(_) => continue,
            };
            // Follows symlinks; dangling ones are skipped.
            let metadata = match fs::metadata(entry.path()) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().to_string();
            results.push(DirectoryEntry::from_metadata(name, &metadata));
        }

        results.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });

        Ok(results)
    }

    /// Metadata for a regular file, validated against the public root.
    pub fn file_entry(&self, path: &Path) -> Result<(PathBuf, DirectoryEntry), BrowserError> {
        let canonical = self.validate_path(path)?;
        let metadata = fs::metadata(&canonical)?;
        if !metadata.is_file() {
            return Err(BrowserError::NotAFile(path.to_path_buf()));
        }
        let name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok((canonical, DirectoryEntry::from_metadata(name, &metadata)))
    }

    /// Create a directory, including missing parents.
    pub fn create_dir(&self, path: &Path) -> Result<PathBuf, BrowserError> {
        if fs::symlink_metadata(path).is_ok() {
            return Err(BrowserError::AlreadyExists(path.to_path_buf()));
        }

        // Find the deepest existing ancestor and make sure it is inside the root.
        let mut existing = path;
        while fs::symlink_metadata(existing).is_err() {
            existing = existing
                .parent()
                .ok_or_else(|| BrowserError::InvalidName(path.display().to_string()))?;
        }
        self.validate_path(existing)?;

        fs::create_dir_all(path)?;
        info!("Created directory {}", path.display());
        Ok(path.to_path_buf())
    }

    /// Remove a file or directory tree.
    pub fn remove(&self, path: &Path) -> Result<PathBuf, BrowserError> {
        let metadata = fs::symlink_metadata(path).map_err(|e| map_io(e, path))?;

        // A symlink is removed as a link; only its parent has to be inside the root.
        let resolved = if metadata.file_type().is_symlink() {
            self.validate_path_for_creation(path)?
        } else {
            self.validate_path(path)?
        };
        if resolved == self.root {
            return Err(BrowserError::RootNotRemovable);
        }

        if metadata.is_dir() {
            fs::remove_dir_all(&resolved)?;
        } else {
            fs::remove_file(&resolved)?;
        }
        info!("Removed {}", path.display());
        Ok(resolved)
    }
}

fn map_io(e: io::Error, path: &Path) -> BrowserError {
    if e.kind() == io::ErrorKind::NotFound {
        BrowserError::PathNotFound(path.to_path_buf())
    } else {
        BrowserError::Io(e)
    }
}
