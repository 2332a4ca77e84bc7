//! Error types for bundle and package operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading bundles or reading/writing packages.
#[derive(Error, Debug)]
pub enum PackageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error tied to a specific file
    #[error("I/O error on {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// ZIP archive error
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Directory is not a notebook bundle
    #[error("not a valid notebook bundle: {path}: {reason}")]
    InvalidBundle { path: PathBuf, reason: String },

    /// Checksum verification failed for a package entry
    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Embedded PDF does not match the hash recorded in the manifest
    #[error("embedded PDF hash mismatch: expected {expected}, got {actual}")]
    PdfHashMismatch { expected: String, actual: String },

    /// Missing required entry in package
    #[error("missing required file: {0}")]
    MissingFile(String),

    /// Package written by a newer (or unknown) format version
    #[error("unsupported package version: {version} (supported: {supported})")]
    UnsupportedVersion { version: u32, supported: u32 },

    /// Corrupted manifest
    #[error("corrupted manifest: {0}")]
    CorruptedManifest(String),

    /// Archive entry would land outside the extraction root
    #[error("unsafe entry path in package: {0}")]
    UnsafeEntryPath(String),
}

impl PackageError {
    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PackageError::IoAt {
            path: path.into(),
            source,
        }
    }

    /// True when the error means the input failed validation (bad manifest,
    /// unknown version, unsafe layout) rather than an I/O or integrity fault.
    pub fn is_validation(&self) -> bool {
        match self {
            PackageError::Zip(zip::result::ZipError::Io(_)) => false,
            PackageError::Json(_)
            | PackageError::Zip(_)
            | PackageError::InvalidBundle { .. }
            | PackageError::MissingFile(_)
            | PackageError::UnsupportedVersion { .. }
            | PackageError::CorruptedManifest(_)
            | PackageError::UnsafeEntryPath(_) => true,
            _ => false,
        }
    }

    /// True when content did not match a recorded checksum.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            PackageError::ChecksumMismatch { .. } | PackageError::PdfHashMismatch { .. }
        )
    }
}

/// Result type alias for package operations.
pub type Result<T> = std::result::Result<T, PackageError>;
