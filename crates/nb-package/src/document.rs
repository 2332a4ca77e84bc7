//! Notebook bundle model.
//!
//! A bundle is a directory (conventionally `Name.snb`) holding a
//! `document.json` manifest plus per-page assets under `pages/`. This module
//! only reads bundles; the live application owns their mutation.

use crate::{PackageError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Manifest file name at the root of every bundle.
pub const DOCUMENT_FILE_NAME: &str = "document.json";

/// Newest bundle format this crate understands.
pub const BUNDLE_FORMAT_VERSION: u32 = 2;

/// Directory suffix of notebook bundles.
pub const BUNDLE_EXTENSION: &str = "snb";

/// File extension of portable packages.
pub const PACKAGE_EXTENSION: &str = "snbx";

/// Directory inside a bundle holding page assets.
pub const PAGES_DIR: &str = "pages";

fn legacy_format_version() -> u32 {
    1
}

fn default_background() -> String {
    "#ffffff".to_string()
}

/// Page geometry of a notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// Fixed-size pages; can be rasterized to PDF.
    #[default]
    Paged,
    /// One unbounded canvas; has no fixed pages.
    Edgeless,
}

impl std::fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutMode::Paged => write!(f, "paged"),
            LayoutMode::Edgeless => write!(f, "edgeless"),
        }
    }
}

/// Page size in 96-dpi pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl Default for PageSize {
    fn default() -> Self {
        // US Letter at 96 dpi
        PageSize {
            width: 816.0,
            height: 1056.0,
        }
    }
}

impl PageSize {
    /// Size in PDF points (1/72 inch).
    pub fn to_points(self) -> (f64, f64) {
        (self.width * 72.0 / 96.0, self.height * 72.0 / 96.0)
    }
}

/// Entry in the document's ordered page list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRef {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PageRef {
    pub fn new(id: impl Into<String>) -> Self {
        PageRef {
            id: id.into(),
            extra: Map::new(),
        }
    }
}

/// Parsed `document.json`.
///
/// Fields the engine does not interpret are kept in `extra` so that a
/// package round-trip reproduces the manifest faithfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookDocument {
    #[serde(default = "legacy_format_version")]
    pub format_version: u32,

    pub notebook_id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub mode: LayoutMode,

    #[serde(default)]
    pub page_size: PageSize,

    #[serde(default = "default_background")]
    pub background_color: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_relative_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_hash: Option<String>,

    #[serde(default)]
    pub pages: Vec<PageRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotebookDocument {
    /// Create a paged document with the given id and page ids.
    pub fn new(notebook_id: impl Into<String>, name: impl Into<String>) -> Self {
        NotebookDocument {
            format_version: BUNDLE_FORMAT_VERSION,
            notebook_id: notebook_id.into(),
            name: name.into(),
            mode: LayoutMode::Paged,
            page_size: PageSize::default(),
            background_color: default_background(),
            pdf_path: None,
            pdf_relative_path: None,
            pdf_hash: None,
            pages: Vec::new(),
            created: Some(Utc::now()),
            last_modified: None,
            extra: Map::new(),
        }
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: NotebookDocument = serde_json::from_str(json)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Serialize with consistent formatting.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.notebook_id.trim().is_empty() {
            return Err(PackageError::CorruptedManifest(
                "notebook_id is empty".to_string(),
            ));
        }
        if self.pages.iter().any(|p| p.id.trim().is_empty()) {
            return Err(PackageError::CorruptedManifest(
                "page entry has empty id".to_string(),
            ));
        }
        // page ids name files under pages/
        if let Some(page) = self.pages.iter().find(|p| !is_plain_name(&p.id)) {
            return Err(PackageError::UnsafeEntryPath(format!(
                "{PAGES_DIR}/{}",
                page.id
            )));
        }
        if self.format_version > BUNDLE_FORMAT_VERSION {
            warn!(
                format_version = self.format_version,
                supported = BUNDLE_FORMAT_VERSION,
                "Bundle written by a newer format version"
            );
        }
        Ok(())
    }

    pub fn is_edgeless(&self) -> bool {
        self.mode == LayoutMode::Edgeless
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Background color as RGB, white when the stored value is malformed.
    pub fn background_rgb(&self) -> [u8; 3] {
        parse_hex_color(&self.background_color).unwrap_or([255, 255, 255])
    }
}

/// Parse `#rrggbb` (leading `#` optional).
pub fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some([r, g, b])
}

/// `sha256:<hex>` digest of a byte slice, the form stored in `pdf_hash`.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Case-insensitive extension check (`ext` without the dot).
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Bundle directory name without its `.snb` suffix.
pub fn bundle_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    strip_suffix_ci(&name, &format!(".{BUNDLE_EXTENSION}")).to_string()
}

pub(crate) fn strip_suffix_ci<'a>(name: &'a str, suffix: &str) -> &'a str {
    if name.len() >= suffix.len() {
        let split = name.len() - suffix.len();
        if name.is_char_boundary(split) && name[split..].eq_ignore_ascii_case(suffix) {
            return &name[..split];
        }
    }
    name
}

/// True for a single path component that stays inside its parent directory.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

/// Quick validity check: a directory whose `document.json` parses.
pub fn is_valid_bundle(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    let manifest = path.join(DOCUMENT_FILE_NAME);
    if !manifest.is_file() {
        return false;
    }
    match fs::read_to_string(&manifest) {
        Ok(json) => NotebookDocument::from_json(&json).is_ok(),
        Err(_) => false,
    }
}

/// Assets belonging to one page, in page-list order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageAssets {
    pub index: usize,
    pub page_id: String,
    /// `(extension, absolute path)` pairs sorted by extension.
    pub files: Vec<(String, PathBuf)>,
}

impl PageAssets {
    /// Path of the asset with the given extension, if present.
    pub fn file_with_extension(&self, ext: &str) -> Option<&Path> {
        self.files
            .iter()
            .find(|(e, _)| e.eq_ignore_ascii_case(ext))
            .map(|(_, p)| p.as_path())
    }
}

/// An opened bundle: its location plus parsed document.
#[derive(Debug, Clone)]
pub struct NotebookBundle {
    root: PathBuf,
    document: NotebookDocument,
}

impl NotebookBundle {
    /// Open and parse a bundle directory.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(PackageError::InvalidBundle {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let manifest_path = path.join(DOCUMENT_FILE_NAME);
        if !manifest_path.is_file() {
            return Err(PackageError::InvalidBundle {
                path: path.to_path_buf(),
                reason: format!("{DOCUMENT_FILE_NAME} not found"),
            });
        }

        let json = fs::read_to_string(&manifest_path)
            .map_err(|e| PackageError::io_at(&manifest_path, e))?;
        let document = NotebookDocument::from_json(&json)?;

        debug!(
            path = %path.display(),
            notebook_id = %document.notebook_id,
            pages = document.page_count(),
            mode = %document.mode,
            "Bundle opened"
        );

        Ok(NotebookBundle {
            root: path.to_path_buf(),
            document,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document(&self) -> &NotebookDocument {
        &self.document
    }

    /// Display name: document name, else the directory stem.
    pub fn display_name(&self) -> String {
        if self.document.name.trim().is_empty() {
            bundle_stem(&self.root)
        } else {
            self.document.name.clone()
        }
    }

    /// Locate the linked PDF: absolute path first, then the bundle-relative one.
    pub fn linked_pdf(&self) -> Option<PathBuf> {
        if let Some(abs) = self.document.pdf_path.as_deref().filter(|p| !p.is_empty()) {
            let abs = PathBuf::from(abs);
            if abs.is_file() {
                return Some(abs);
            }
        }
        if let Some(rel) = self
            .document
            .pdf_relative_path
            .as_deref()
            .filter(|p| !p.is_empty())
        {
            let candidate = self.root.join(rel);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// True when the document references a PDF at all (found or not).
    pub fn has_pdf_reference(&self) -> bool {
        self.document.pdf_path.as_deref().is_some_and(|p| !p.is_empty())
            || self
                .document
                .pdf_relative_path
                .as_deref()
                .is_some_and(|p| !p.is_empty())
    }

    /// Page assets grouped by page, in page-list order.
    ///
    /// Files under `pages/` whose stem matches no page id are not returned
    /// here; [`NotebookBundle::extra_files`] reports them.
    pub fn page_assets(&self) -> Result<Vec<PageAssets>> {
        let mut by_id: HashMap<&str, usize> = HashMap::new();
        let mut pages: Vec<PageAssets> = self
            .document
            .pages
            .iter()
            .enumerate()
            .map(|(index, page)| PageAssets {
                index,
                page_id: page.id.clone(),
                files: Vec::new(),
            })
            .collect();
        for (index, page) in self.document.pages.iter().enumerate() {
            by_id.entry(page.id.as_str()).or_insert(index);
        }

        let pages_dir = self.root.join(PAGES_DIR);
        if pages_dir.is_dir() {
            for (stem, ext, path) in page_dir_files(&pages_dir)? {
                if let Some(&index) = by_id.get(stem.as_str()) {
                    pages[index].files.push((ext, path));
                }
            }
        }

        for page in &mut pages {
            page.files.sort_by(|a, b| a.0.cmp(&b.0));
        }
        Ok(pages)
    }

    /// Every file that is neither `document.json` nor a page asset, as
    /// `(relative path with '/' separators, absolute path)`, sorted.
    pub fn extra_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let page_ids: HashMap<&str, ()> = self
            .document
            .pages
            .iter()
            .map(|p| (p.id.as_str(), ()))
            .collect();

        let mut extras = Vec::new();
        for (rel, abs) in walk_files(&self.root)? {
            if rel == DOCUMENT_FILE_NAME {
                continue;
            }
            if let Some(name) = rel.strip_prefix(&format!("{PAGES_DIR}/")) {
                if !name.contains('/') {
                    let stem = Path::new(name)
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    if page_ids.contains_key(stem.as_str()) {
                        continue;
                    }
                }
            }
            extras.push((rel, abs));
        }
        extras.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(extras)
    }

    /// Sum of all file sizes inside the bundle.
    pub fn total_bytes(&self) -> Result<u64> {
        directory_size(&self.root)
    }
}

/// Direct children of `pages/` as `(stem, extension, path)`.
fn page_dir_files(pages_dir: &Path) -> Result<Vec<(String, String, PathBuf)>> {
    let mut out = Vec::new();
    let entries = fs::read_dir(pages_dir).map_err(|e| PackageError::io_at(pages_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PackageError::io_at(pages_dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push((stem, ext, path));
    }
    out.sort_by(|a, b| a.2.cmp(&b.2));
    Ok(out)
}

/// Recursively list regular files under `root` as `(relative, absolute)`.
pub(crate) fn walk_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| PackageError::io_at(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| PackageError::io_at(&dir, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| PackageError::io_at(entry.path(), e))?;
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push((rel, path));
            }
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Total size of regular files below `root`.
pub fn directory_size(root: &Path) -> Result<u64> {
    let mut total = 0u64;
    for (_, path) in walk_files(root)? {
        let meta = fs::metadata(&path).map_err(|e| PackageError::io_at(&path, e))?;
        total += meta.len();
    }
    Ok(total)
}
