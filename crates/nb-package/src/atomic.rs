//! Temp-then-rename file output.
//!
//! Artifacts are written to `<final>.tmp.<pid>` next to the destination and
//! renamed into place on commit. A writer dropped before `commit` removes its
//! temp file, so the final path only ever holds complete output.

use crate::{PackageError, Result};
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Temp path used while producing `final_path`.
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    final_path.with_file_name(format!("{}.tmp.{}", file_name, std::process::id()))
}

/// File handle that becomes visible at its final path only on [`commit`].
///
/// [`commit`]: AtomicFile::commit
#[derive(Debug)]
pub struct AtomicFile {
    temp_path: PathBuf,
    final_path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl AtomicFile {
    /// Create the temp file for `final_path`. The parent must exist.
    pub fn create(final_path: &Path) -> Result<Self> {
        let temp_path = temp_path_for(final_path);
        let file = File::create(&temp_path).map_err(|e| PackageError::io_at(&temp_path, e))?;
        debug!(temp = %temp_path.display(), "Opened temp output");
        Ok(Self {
            temp_path,
            final_path: final_path.to_path_buf(),
            file: Some(file),
            committed: false,
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flush to disk and rename over the final path.
    pub fn commit(mut self) -> Result<u64> {
        let file = self
            .file
            .take()
            .ok_or_else(|| PackageError::io_at(&self.temp_path, closed_error()))?;
        file.sync_all()
            .map_err(|e| PackageError::io_at(&self.temp_path, e))?;
        let bytes = file
            .metadata()
            .map_err(|e| PackageError::io_at(&self.temp_path, e))?
            .len();
        drop(file);

        fs::rename(&self.temp_path, &self.final_path)
            .map_err(|e| PackageError::io_at(&self.final_path, e))?;
        self.committed = true;
        debug!(path = %self.final_path.display(), bytes, "Committed output");
        Ok(bytes)
    }

    fn inner(&mut self) -> io::Result<&mut File> {
        self.file.as_mut().ok_or_else(closed_error)
    }
}

fn closed_error() -> io::Error {
    io::Error::other("atomic file already closed")
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner()?.flush()
    }
}

impl Seek for AtomicFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner()?.seek(pos)
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.file.take();
        if let Err(e) = fs::remove_file(&self.temp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(temp = %self.temp_path.display(), error = %e, "Failed to remove temp output");
            }
        }
    }
}
