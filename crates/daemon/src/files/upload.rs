//! Chunked, cancelable upload writes.
//!
//! An upload is copied from a positional source into its destination one
//! part at a time. The destination is sized up front, every part is read at
//! its own offset, and cancellation is checked at each part boundary so an
//! abandoned upload stops without finishing the copy.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use access::ErrorKind;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that can occur while writing an upload.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The upload was canceled at a part boundary.
    #[error("upload canceled after {bytes_written} bytes")]
    Canceled { bytes_written: u64 },

    /// The source ended before the declared size was reached.
    #[error("short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: u64, actual: u64 },

    /// Part size must be positive.
    #[error("part size must be greater than 0")]
    InvalidPartSize,

    /// The destination already exists.
    #[error("file already exists: {0}")]
    AlreadyExists(std::path::PathBuf),

    /// IO error.
    #[error("IO error after {bytes_written} bytes: {source}")]
    Io {
        bytes_written: u64,
        #[source]
        source: io::Error,
    },
}

impl UploadError {
    /// Bytes committed to the destination before the failure.
    pub fn bytes_written(&self) -> u64 {
        match self {
            UploadError::Canceled { bytes_written } | UploadError::Io { bytes_written, .. } => {
                *bytes_written
            }
            UploadError::ShortWrite { actual, .. } => *actual,
            UploadError::InvalidPartSize | UploadError::AlreadyExists(_) => 0,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Canceled { .. } => ErrorKind::Canceled,
            UploadError::ShortWrite { .. } => ErrorKind::Integrity,
            UploadError::InvalidPartSize => ErrorKind::Malformed,
            UploadError::AlreadyExists(_) => ErrorKind::Conflict,
            UploadError::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Positional reads that leave no cursor behind.
pub trait ReadAt {
    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns 0 at end of input.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        FileExt::read_at(self, buf, offset)
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = match usize::try_from(offset) {
            Ok(start) if start < self.len() => start,
            _ => return Ok(0),
        };
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

/// Fill `buf` from `offset`, stopping early only at end of input.
pub fn read_full_at<R: ReadAt + ?Sized>(
    source: &R,
    buf: &mut [u8],
    offset: u64,
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Copies a sized source into a destination file part by part.
#[derive(Debug)]
pub struct UploadWriter<R> {
    source: R,
    total_size: u64,
    part_size: u64,
    cancel: CancellationToken,
}

impl<R: ReadAt> UploadWriter<R> {
    pub fn new(
        source: R,
        total_size: u64,
        part_size: u64,
        cancel: CancellationToken,
    ) -> Result<Self, UploadError> {
        if part_size == 0 {
            return Err(UploadError::InvalidPartSize);
        }
        Ok(Self {
            source,
            total_size,
            part_size,
            cancel,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Write the whole source to `dest`, returning the bytes written.
    ///
    /// The destination is created (or truncated) and sized to the declared
    /// total before the first part. On error it is left in place; see
    /// [`store_upload`] for the variant that cleans up.
    pub fn write_to(&self, dest: &Path) -> Result<u64, UploadError> {
        let io_err = |bytes_written: u64| {
            move |source: io::Error| UploadError::Io {
                bytes_written,
                source,
            }
        };

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(dest)
            .map_err(io_err(0))?;
        file.set_len(self.total_size).map_err(io_err(0))?;

        let buf_len = usize::try_from(self.part_size.min(self.total_size)).unwrap_or(usize::MAX);
        let mut buffer = vec![0u8; buf_len];
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;

        let mut offset = 0u64;
        while offset < self.total_size {
            if self.cancel.is_cancelled() {
                debug!(written, total = self.total_size, "Upload canceled at part boundary");
                return Err(UploadError::Canceled {
                    bytes_written: written,
                });
            }

            let want = self.part_size.min(self.total_size - offset) as usize;
            let n = read_full_at(&self.source, &mut buffer[..want], offset)
                .map_err(io_err(written))?;
            writer.write_all(&buffer[..n]).map_err(io_err(written))?;
            written += n as u64;

            if n < want {
                writer.flush().map_err(io_err(written))?;
                return Err(UploadError::ShortWrite {
                    expected: self.total_size,
                    actual: written,
                });
            }
            offset += self.part_size;
        }

        writer.flush().map_err(io_err(written))?;
        if written != self.total_size {
            return Err(UploadError::ShortWrite {
                expected: self.total_size,
                actual: written,
            });
        }
        Ok(written)
    }
}

/// Store an upload at `dest`, removing the partial file on failure.
///
/// Refuses to touch an existing destination.
pub fn store_upload<R: ReadAt>(writer: &UploadWriter<R>, dest: &Path) -> Result<u64, UploadError> {
    if fs::symlink_metadata(dest).is_ok() {
        return Err(UploadError::AlreadyExists(dest.to_path_buf()));
    }

    match writer.write_to(dest) {
        Ok(written) => {
            info!("Stored upload {} ({} bytes)", dest.display(), written);
            Ok(written)
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(dest) {
                if rm.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove partial upload {}: {}", dest.display(), rm);
                }
            }
            Err(e)
        }
    }
}
