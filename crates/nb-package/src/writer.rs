//! Package writer for creating `.snbx` files.
//!
//! Creates ZIP archives with a manifest and per-entry checksums.

use crate::atomic::AtomicFile;
use crate::document::{content_hash, NotebookBundle, NotebookDocument};
use crate::manifest::{
    page_asset_path, FileEntry, PackageManifest, PageEntry, PdfEntry, EXTRAS_PREFIX,
    MANIFEST_FILE_NAME, PDF_PREFIX,
};
use crate::{PackageError, Result};
use std::fs;
use std::io::{Cursor, Seek, Write};
use std::path::Path;
use tracing::{debug, info, warn};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

/// Relative location the restored document uses for an embedded PDF.
pub const EMBEDDED_PDF_DIR: &str = "embedded";

/// Builder for `.snbx` packages.
pub struct PackageWriter {
    manifest: PackageManifest,
    files: Vec<(String, Vec<u8>)>,
    warnings: Vec<String>,
}

impl PackageWriter {
    /// Create an empty writer for a document snapshot.
    pub fn new(bundle_name: impl Into<String>, document: NotebookDocument) -> Self {
        let manifest = PackageManifest::new(bundle_name, document)
            .with_generator(concat!("nb-package/", env!("CARGO_PKG_VERSION")));
        Self {
            manifest,
            files: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Snapshot a bundle from disk: page assets, extras and, when asked,
    /// the linked PDF.
    ///
    /// A PDF that cannot be found or read does not fail the package; it is
    /// recorded in [`PackageWriter::warnings`].
    pub fn from_bundle(bundle: &NotebookBundle, include_pdf: bool) -> Result<Self> {
        let bundle_name = bundle
            .root()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| bundle.display_name());
        let mut writer = Self::new(bundle_name, bundle.document().clone());

        for page in bundle.page_assets()? {
            for (ext, path) in &page.files {
                let data = fs::read(path).map_err(|e| PackageError::io_at(path, e))?;
                writer.add_page_asset(page.index, &page.page_id, ext, data);
            }
            if page.files.is_empty() {
                writer.manifest.pages.push(PageEntry {
                    index: page.index,
                    page_id: page.page_id.clone(),
                    assets: Vec::new(),
                });
            }
        }

        for (rel, path) in bundle.extra_files()? {
            let data = fs::read(&path).map_err(|e| PackageError::io_at(&path, e))?;
            writer.add_file(format!("{EXTRAS_PREFIX}{rel}"), data);
        }

        if include_pdf && bundle.has_pdf_reference() {
            match bundle.linked_pdf() {
                Some(pdf_path) => match fs::read(&pdf_path) {
                    Ok(data) => {
                        let file_name = pdf_path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| "document.pdf".to_string());
                        writer.embed_pdf(&file_name, data);
                    }
                    Err(e) => {
                        warn!(path = %pdf_path.display(), error = %e, "Linked PDF unreadable");
                        writer
                            .warnings
                            .push(format!("PDF not embedded: {}: {e}", pdf_path.display()));
                    }
                },
                None => {
                    warn!(bundle = %bundle.root().display(), "Linked PDF not found");
                    writer
                        .warnings
                        .push("PDF not embedded: linked PDF not found".to_string());
                }
            }
        }

        Ok(writer)
    }

    /// Add an arbitrary entry with automatic checksum.
    pub fn add_file(&mut self, path: impl Into<String>, data: Vec<u8>) {
        let path = path.into();
        let checksum = FileEntry::compute_checksum(&data);
        let bytes = data.len() as u64;
        debug!(path = %path, bytes, "Added file to package");
        self.manifest.add_file(FileEntry::new(&path, checksum, bytes));
        self.files.push((path, data));
    }

    /// Add one asset of a page under `pages/<notebook_id>/<index:04>.<ext>`.
    pub fn add_page_asset(&mut self, index: usize, page_id: &str, ext: &str, data: Vec<u8>) {
        let path = page_asset_path(&self.manifest.notebook_id, index, ext);
        match self.manifest.pages.iter_mut().find(|p| p.index == index) {
            Some(entry) => entry.assets.push(path.clone()),
            None => self.manifest.pages.push(PageEntry {
                index,
                page_id: page_id.to_string(),
                assets: vec![path.clone()],
            }),
        }
        self.add_file(path, data);
    }

    /// Embed a PDF and point the document snapshot at its restored location.
    pub fn embed_pdf(&mut self, file_name: &str, data: Vec<u8>) {
        let hash = content_hash(&data);
        let path = format!("{PDF_PREFIX}{file_name}");
        self.manifest.pdf = Some(PdfEntry {
            path: path.clone(),
            file_name: file_name.to_string(),
            sha256: hash.clone(),
            bytes: data.len() as u64,
        });
        let doc = &mut self.manifest.document;
        doc.pdf_relative_path = Some(format!("../{EMBEDDED_PDF_DIR}/{file_name}"));
        doc.pdf_hash = Some(hash);
        self.add_file(path, data);
    }

    /// Non-fatal problems met while collecting the bundle.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Get the current manifest (for inspection before writing).
    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    /// Total size in bytes before compression.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|(_, data)| data.len() as u64).sum()
    }

    /// Entry count, not including the manifest.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Write the package through a temp file renamed over `path` on success.
    pub fn write_atomic(self, path: &Path) -> Result<(PackageManifest, u64)> {
        let out = AtomicFile::create(path)?;
        let (out, manifest) = self.write_archive(out)?;
        let bytes = out.commit()?;

        info!(
            path = %path.display(),
            files = manifest.file_count(),
            bytes,
            notebook_id = %manifest.notebook_id,
            "Package written"
        );
        Ok((manifest, bytes))
    }

    /// Write the package to a byte vector (for in-memory use).
    pub fn write_to_vec(self) -> Result<(Vec<u8>, PackageManifest)> {
        let (cursor, manifest) = self.write_archive(Cursor::new(Vec::new()))?;
        Ok((cursor.into_inner(), manifest))
    }

    fn write_archive<W: Write + Seek>(mut self, sink: W) -> Result<(W, PackageManifest)> {
        self.manifest.sort_files();
        self.manifest.pages.sort_by_key(|p| p.index);
        self.files.sort_by(|a, b| a.0.cmp(&b.0));
        self.manifest.validate()?;

        let manifest_json = self.manifest.to_json()?;

        let mut zip = ZipWriter::new(sink);
        let deflated: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);
        // PDFs are already compressed
        let stored: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .unix_permissions(0o644);

        zip.start_file(MANIFEST_FILE_NAME, deflated)?;
        zip.write_all(manifest_json.as_bytes())?;

        for (file_path, data) in &self.files {
            let options = if file_path.starts_with(PDF_PREFIX) {
                stored
            } else {
                deflated
            };
            zip.start_file(file_path.as_str(), options)?;
            zip.write_all(data)?;
        }

        let sink = zip.finish()?;
        Ok((sink, self.manifest))
    }
}
