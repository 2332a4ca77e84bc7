//! Package manifest types and serialization.
//!
//! The manifest is the source of truth for a package's contents:
//! - Package format version and creation metadata
//! - Snapshot of the bundle's `document.json`
//! - Optional embedded PDF with its content hash
//! - Page asset mapping and a checksum for every archive entry

use crate::document::{is_plain_name, NotebookDocument};
use crate::{PackageError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Newest package format version this crate reads and writes.
pub const PACKAGE_VERSION: u32 = 1;

/// Manifest file name within the package.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Archive area for the embedded PDF.
pub const PDF_PREFIX: &str = "pdf/";

/// Archive area for page assets.
pub const PAGES_PREFIX: &str = "pages/";

/// Archive area for every other bundle file.
pub const EXTRAS_PREFIX: &str = "extras/";

/// Package manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package format version.
    pub package_version: u32,

    /// When the package was created.
    pub created_at: DateTime<Utc>,

    /// Directory name of the source bundle (e.g. `Lecture.snb`).
    pub bundle_name: String,

    /// Notebook identity, mirrors `document.notebook_id`.
    pub notebook_id: String,

    /// `document.json` as it should be restored on import.
    pub document: NotebookDocument,

    /// Embedded PDF, when one was packed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<PdfEntry>,

    /// Page assets in page order.
    #[serde(default)]
    pub pages: Vec<PageEntry>,

    /// Every entry besides the manifest, with checksums.
    #[serde(default)]
    pub files: Vec<FileEntry>,

    /// Tool that wrote the package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
}

impl PackageManifest {
    /// Create a manifest for the given bundle snapshot.
    pub fn new(bundle_name: impl Into<String>, document: NotebookDocument) -> Self {
        Self {
            package_version: PACKAGE_VERSION,
            created_at: Utc::now(),
            bundle_name: bundle_name.into(),
            notebook_id: document.notebook_id.clone(),
            document,
            pdf: None,
            pages: Vec::new(),
            files: Vec::new(),
            generator: None,
        }
    }

    /// Set the generator string.
    pub fn with_generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = Some(generator.into());
        self
    }

    /// Add a file entry to the manifest.
    pub fn add_file(&mut self, entry: FileEntry) {
        self.files.push(entry);
    }

    /// Total size of all entries in bytes (uncompressed).
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Find a file by archive path.
    pub fn find_file(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Number of page assets across all pages.
    pub fn page_asset_count(&self) -> usize {
        self.pages.iter().map(|p| p.assets.len()).sum()
    }

    /// Validate the manifest structure.
    pub fn validate(&self) -> Result<()> {
        if self.package_version == 0 || self.package_version > PACKAGE_VERSION {
            return Err(PackageError::UnsupportedVersion {
                version: self.package_version,
                supported: PACKAGE_VERSION,
            });
        }

        if self.notebook_id.trim().is_empty() {
            return Err(PackageError::CorruptedManifest(
                "notebook_id is empty".to_string(),
            ));
        }
        if self.notebook_id != self.document.notebook_id {
            return Err(PackageError::CorruptedManifest(format!(
                "notebook_id '{}' does not match document '{}'",
                self.notebook_id, self.document.notebook_id
            )));
        }
        self.document.validate()?;

        for file in &self.files {
            if file.path.is_empty() {
                return Err(PackageError::CorruptedManifest(
                    "file entry has empty path".to_string(),
                ));
            }
            if !is_safe_entry_path(&file.path) {
                return Err(PackageError::UnsafeEntryPath(file.path.clone()));
            }
            if file.sha256.len() != 64 || !file.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(PackageError::CorruptedManifest(format!(
                    "file '{}' has invalid checksum",
                    file.path
                )));
            }
        }

        if let Some(pdf) = &self.pdf {
            if !pdf.path.starts_with(PDF_PREFIX) || self.find_file(&pdf.path).is_none() {
                return Err(PackageError::CorruptedManifest(format!(
                    "embedded PDF '{}' is not listed",
                    pdf.path
                )));
            }
            if !is_plain_name(&pdf.file_name) {
                return Err(PackageError::UnsafeEntryPath(pdf.file_name.clone()));
            }
            if !pdf.sha256.starts_with("sha256:") {
                return Err(PackageError::CorruptedManifest(
                    "embedded PDF hash must be sha256:<hex>".to_string(),
                ));
            }
        }

        for page in &self.pages {
            // restored as pages/<page_id>.<ext>
            if !is_plain_name(&page.page_id) {
                return Err(PackageError::UnsafeEntryPath(page.page_id.clone()));
            }
            for asset in &page.assets {
                if !asset.starts_with(PAGES_PREFIX) || self.find_file(asset).is_none() {
                    return Err(PackageError::CorruptedManifest(format!(
                        "page asset '{asset}' is not listed"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Sort files for deterministic ordering.
    pub fn sort_files(&mut self) {
        self.files.sort_by(|a, b| a.path.cmp(&b.path));
    }

    /// Serialize to JSON with consistent formatting.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Embedded PDF descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfEntry {
    /// Archive path (`pdf/<file_name>`).
    pub path: String,
    /// Original file name of the PDF.
    pub file_name: String,
    /// `sha256:<hex>` of the embedded bytes.
    pub sha256: String,
    pub bytes: u64,
}

/// Assets belonging to one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEntry {
    /// Zero-based position in the document's page list.
    pub index: usize,
    pub page_id: String,
    /// Archive paths under `pages/<notebook_id>/`.
    #[serde(default)]
    pub assets: Vec<String>,
}

/// File entry in the manifest with checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path within the archive.
    pub path: String,

    /// SHA-256 checksum (64 hex characters).
    pub sha256: String,

    /// Size in bytes.
    pub bytes: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, sha256: impl Into<String>, bytes: u64) -> Self {
        Self {
            path: path.into(),
            sha256: sha256.into(),
            bytes,
        }
    }

    /// Compute SHA-256 checksum of data.
    pub fn compute_checksum(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Verify the checksum against data.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute_checksum(data) == self.sha256
    }
}

/// Archive path for a page asset: `pages/<notebook_id>/<index:04>.<ext>`.
pub fn page_asset_path(notebook_id: &str, index: usize, ext: &str) -> String {
    if ext.is_empty() {
        format!("{PAGES_PREFIX}{notebook_id}/{index:04}")
    } else {
        format!("{PAGES_PREFIX}{notebook_id}/{index:04}.{ext}")
    }
}

/// True when `path` is relative, uses `/` separators, and never climbs out of
/// the extraction root.
pub fn is_safe_entry_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains('\0') {
        return false;
    }
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return false;
    }
    path.split('/')
        .all(|part| !part.is_empty() && part != "." && part != "..")
}
