//! Batch download packaging.
//!
//! Several files or directory trees are bundled into one zip archive under
//! the temp root. The archive is ephemeral: it is handed out through a
//! single-use signed link and removed once served or once its link expires.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use access::{confine, ErrorKind};
use chrono::Local;
use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const SUFFIX_LENGTH: usize = 8;

/// Errors that can occur while packaging an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Nothing to package.
    #[error("no paths to package")]
    Empty,

    /// An input path does not exist.
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    /// Walking an input tree failed.
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// Writing the zip container failed.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Empty => ErrorKind::Malformed,
            ArchiveError::NotFound(_) => ErrorKind::NotFound,
            ArchiveError::Walk { .. } | ArchiveError::Zip(_) | ArchiveError::Io(_) => {
                ErrorKind::Io
            }
        }
    }
}

/// Packages paths into zip archives under the temp root.
#[derive(Debug, Clone)]
pub struct ArchivePackager {
    temp_root: PathBuf,
}

impl ArchivePackager {
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Package `paths` into a fresh archive and return its location.
    ///
    /// Each input appears in the archive under its own base name, so a
    /// directory keeps its name as the root of its entries. On failure the
    /// partial archive is removed.
    pub fn package(&self, paths: &[PathBuf]) -> Result<PathBuf, ArchiveError> {
        if paths.is_empty() {
            return Err(ArchiveError::Empty);
        }

        let target = self.temp_root.join(archive_name());
        match self.write_archive(&target, paths) {
            Ok(entries) => {
                info!(
                    "Packaged {} paths ({} entries) into {}",
                    paths.len(),
                    entries,
                    target.display()
                );
                Ok(target)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&target) {
                    if rm.kind() != io::ErrorKind::NotFound {
                        warn!("Failed to remove partial archive {}: {}", target.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    fn write_archive(&self, target: &Path, paths: &[PathBuf]) -> Result<usize, ArchiveError> {
        let file = File::create(target)?;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        // Entry name -> source it was written from.
        let mut written: HashMap<String, PathBuf> = HashMap::new();
        for source in paths {
            if fs::symlink_metadata(source).is_err() {
                return Err(ArchiveError::NotFound(source.clone()));
            }
            let base = source.parent().unwrap_or(source);

            for entry in WalkDir::new(source) {
                let entry = entry.map_err(|e| ArchiveError::Walk {
                    path: source.clone(),
                    source: e,
                })?;
                let relative = entry.path().strip_prefix(base).unwrap_or(entry.path());
                let name = entry_name(relative);
                if name.is_empty() {
                    continue;
                }

                let file_type = entry.file_type();
                if file_type.is_dir() {
                    let name = format!("{name}/");
                    // Same-named directories from different inputs merge.
                    if written.contains_key(&name) {
                        continue;
                    }
                    writer.add_directory(name.as_str(), options)?;
                    written.insert(name, entry.path().to_path_buf());
                } else if file_type.is_file() {
                    let name = match written.get(&name) {
                        Some(previous) if previous == entry.path() => {
                            debug!("Skipping {} already in the archive", entry.path().display());
                            continue;
                        }
                        Some(_) => unique_name(&name, &written),
                        None => name,
                    };
                    let size = entry
                        .metadata()
                        .map_err(|e| ArchiveError::Walk {
                            path: source.clone(),
                            source: e,
                        })?
                        .len();
                    writer.start_file(name.as_str(), entry_options(options, size))?;
                    let mut input = File::open(entry.path())?;
                    io::copy(&mut input, &mut writer)?;
                    written.insert(name, entry.path().to_path_buf());
                } else {
                    debug!("Skipping non-regular entry {}", entry.path().display());
                }
            }
        }

        let mut inner = writer.finish()?;
        io::Write::flush(&mut inner)?;
        Ok(written.len())
    }
}

/// Entries at or past 4 GiB need zip64 headers.
fn needs_zip64(size: u64) -> bool {
    size >= u64::from(u32::MAX)
}

fn entry_options(options: SimpleFileOptions, size: u64) -> SimpleFileOptions {
    options.large_file(needs_zip64(size))
}

/// First free `stem (n).ext` variant of `name` within its directory.
fn unique_name(name: &str, taken: &HashMap<String, PathBuf>) -> String {
    let (dir, file) = match name.rsplit_once('/') {
        Some((dir, file)) => (format!("{dir}/"), file),
        None => (String::new(), name),
    };
    let (stem, ext) = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (file, String::new()),
    };
    (1..)
        .map(|n| format!("{dir}{stem} ({n}){ext}"))
        .find(|candidate| !taken.contains_key(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Delete an ephemeral file, but only if it lives under `temp_root`.
///
/// Returns whether a file was removed.
pub fn remove_ephemeral(temp_root: &Path, path: &Path) -> bool {
    if !confine::is_inclusive_strict(temp_root, path) {
        warn!(
            "Refusing to remove {} outside of {}",
            path.display(),
            temp_root.display()
        );
        return false;
    }
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed ephemeral file {}", path.display());
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove ephemeral file {}: {}", path.display(), e);
            false
        }
    }
}

/// `<YYYYMMDDhhmmss>_<8 random alphanumerics>.zip`
fn archive_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LENGTH)
        .map(char::from)
        .collect();
    format!("{}_{}.zip", Local::now().format("%Y%m%d%H%M%S"), suffix)
}

/// Zip entry names always use `/`.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
