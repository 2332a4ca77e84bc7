//! Package reader for opening, verifying and extracting `.snbx` files.

use crate::atomic::AtomicFile;
use crate::document::{
    content_hash, directory_size, is_plain_name, strip_suffix_ci, BUNDLE_EXTENSION,
    DOCUMENT_FILE_NAME, PAGES_DIR,
};
use crate::manifest::{
    FileEntry, PackageManifest, EXTRAS_PREFIX, MANIFEST_FILE_NAME, PAGES_PREFIX, PDF_PREFIX,
};
use crate::writer::EMBEDDED_PDF_DIR;
use crate::{PackageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

/// Upper bound on `Name (n).snb` candidates tried by [`OverwritePolicy::Rename`].
pub const MAX_RENAME_ATTEMPTS: u32 = 1000;

/// What to do when the destination already holds a bundle of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Leave the existing bundle alone.
    Skip,
    /// Replace the existing bundle.
    Overwrite,
    /// Import under a free `Name (n).snb` name.
    #[default]
    Rename,
}

impl std::fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverwritePolicy::Skip => write!(f, "skip"),
            OverwritePolicy::Overwrite => write!(f, "overwrite"),
            OverwritePolicy::Rename => write!(f, "rename"),
        }
    }
}

impl std::str::FromStr for OverwritePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(OverwritePolicy::Skip),
            "overwrite" => Ok(OverwritePolicy::Overwrite),
            "rename" => Ok(OverwritePolicy::Rename),
            other => Err(format!(
                "unknown overwrite policy '{other}' (expected skip, overwrite or rename)"
            )),
        }
    }
}

/// Result of [`PackageReader::extract_bundle`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractOutcome {
    Imported {
        bundle_path: PathBuf,
        /// Total size of the extracted bundle.
        bytes: u64,
        /// Restored PDF, when the package embedded one.
        pdf_path: Option<PathBuf>,
    },
    /// Destination existed and the policy was [`OverwritePolicy::Skip`].
    Skipped { existing: PathBuf },
}

/// Where an import would land, without touching the filesystem.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportPlan {
    Create(PathBuf),
    Replace(PathBuf),
    Skip(PathBuf),
}

/// Reader for `.snbx` packages with verification.
pub struct PackageReader<R: Read + Seek> {
    manifest: PackageManifest,
    archive: ZipArchive<R>,
}

impl PackageReader<File> {
    /// Open a package from a file path.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PackageError::io_at(path, e))?;
        Self::from_reader(file)
    }
}

impl PackageReader<Cursor<Vec<u8>>> {
    /// Open a package from bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> PackageReader<R> {
    /// Create a reader from any Read + Seek source.
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let manifest = Self::read_manifest(&mut archive)?;
        manifest.validate()?;

        info!(
            notebook_id = %manifest.notebook_id,
            files = manifest.file_count(),
            pages = manifest.pages.len(),
            pdf = manifest.pdf.is_some(),
            "Package opened"
        );

        Ok(Self { manifest, archive })
    }

    fn read_manifest(archive: &mut ZipArchive<R>) -> Result<PackageManifest> {
        let mut manifest_file = archive
            .by_name(MANIFEST_FILE_NAME)
            .map_err(|_| PackageError::MissingFile(MANIFEST_FILE_NAME.to_string()))?;

        let mut json = String::new();
        manifest_file.read_to_string(&mut json)?;

        PackageManifest::from_json(&json)
    }

    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    /// List all files in the package.
    pub fn files(&self) -> &[FileEntry] {
        &self.manifest.files
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.manifest.find_file(path).is_some()
    }

    /// Read an entry without verification.
    ///
    /// Use `read_verified` for integrity-checked reads.
    pub fn read_raw(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut file = self.archive.by_name(path).map_err(|e| match e {
            ZipError::FileNotFound => PackageError::MissingFile(path.to_string()),
            other => PackageError::Zip(other),
        })?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        debug!(path, bytes = data.len(), "Read entry from package (unverified)");
        Ok(data)
    }

    /// Read an entry and check it against its manifest checksum.
    pub fn read_verified(&mut self, path: &str) -> Result<Vec<u8>> {
        let entry = self
            .manifest
            .find_file(path)
            .ok_or_else(|| PackageError::MissingFile(path.to_string()))?
            .clone();

        let data = self.read_raw(path)?;
        let actual = FileEntry::compute_checksum(&data);
        if actual != entry.sha256 {
            return Err(PackageError::ChecksumMismatch {
                path: path.to_string(),
                expected: entry.sha256,
                actual,
            });
        }
        Ok(data)
    }

    /// Verify every listed entry. Returns the paths that failed.
    pub fn verify_all(&mut self) -> Vec<String> {
        let paths: Vec<String> = self.manifest.files.iter().map(|f| f.path.clone()).collect();
        let mut failures = Vec::new();
        for path in paths {
            if let Err(e) = self.read_verified(&path) {
                warn!(path = %path, error = %e, "Verification failed");
                failures.push(path);
            }
        }
        failures
    }

    /// Bundle directory name the package restores to, `.snb` enforced.
    ///
    /// Falls back to `fallback_stem` when the recorded name is unusable.
    pub fn target_bundle_name(&self, fallback_stem: &str) -> String {
        let recorded = self.manifest.bundle_name.trim();
        let stem = strip_suffix_ci(recorded, &format!(".{BUNDLE_EXTENSION}"));
        let stem = if is_plain_name(stem) { stem } else { fallback_stem };
        format!("{stem}.{BUNDLE_EXTENSION}")
    }

    /// Decide where extraction into `dest` would go under `policy`.
    pub fn plan_import(
        &self,
        dest: &Path,
        fallback_stem: &str,
        policy: OverwritePolicy,
    ) -> Result<ImportPlan> {
        let name = self.target_bundle_name(fallback_stem);
        let target = dest.join(&name);
        if !target.exists() {
            return Ok(ImportPlan::Create(target));
        }
        match policy {
            OverwritePolicy::Skip => Ok(ImportPlan::Skip(target)),
            OverwritePolicy::Overwrite => Ok(ImportPlan::Replace(target)),
            OverwritePolicy::Rename => {
                let stem = strip_suffix_ci(&name, &format!(".{BUNDLE_EXTENSION}"));
                unique_bundle_path(dest, stem)
                    .map(ImportPlan::Create)
                    .ok_or_else(|| {
                        PackageError::io_at(
                            &target,
                            std::io::Error::new(
                                std::io::ErrorKind::AlreadyExists,
                                "no free bundle name",
                            ),
                        )
                    })
            }
        }
    }

    /// Restore the package as a bundle directory inside `dest`.
    ///
    /// Entries are verified and staged in a hidden sibling directory that is
    /// renamed into place last, so a failure leaves nothing at the target.
    /// An embedded PDF is hash-checked before anything is written, then
    /// restored to `dest/embedded/<stem>_<file>` once the bundle is in place.
    pub fn extract_bundle(
        &mut self,
        dest: &Path,
        fallback_stem: &str,
        policy: OverwritePolicy,
    ) -> Result<ExtractOutcome> {
        let (target, replace) = match self.plan_import(dest, fallback_stem, policy)? {
            ImportPlan::Skip(existing) => {
                info!(existing = %existing.display(), "Import skipped, bundle exists");
                return Ok(ExtractOutcome::Skipped { existing });
            }
            ImportPlan::Create(target) => (target, false),
            ImportPlan::Replace(target) => (target, true),
        };
        let target_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target_stem = strip_suffix_ci(&target_name, &format!(".{BUNDLE_EXTENSION}"));

        let staging = StagingDir::create(
            dest.join(format!(".{target_name}.importing.{}", std::process::id())),
        )?;

        let page_names: HashMap<String, String> = self
            .manifest
            .pages
            .iter()
            .flat_map(|page| {
                page.assets.iter().map(move |asset| {
                    let ext = asset
                        .rsplit('/')
                        .next()
                        .and_then(|file| file.split_once('.').map(|(_, ext)| ext))
                        .unwrap_or("");
                    let name = if ext.is_empty() {
                        page.page_id.clone()
                    } else {
                        format!("{}.{ext}", page.page_id)
                    };
                    (asset.clone(), name)
                })
            })
            .collect();

        let mut pdf_data: Option<Vec<u8>> = None;
        let paths: Vec<String> = self.manifest.files.iter().map(|f| f.path.clone()).collect();
        for path in paths {
            let data = self.read_verified(&path)?;
            let rel = if let Some(name) = page_names.get(&path) {
                format!("{PAGES_DIR}/{name}")
            } else if let Some(rel) = path.strip_prefix(EXTRAS_PREFIX) {
                rel.to_string()
            } else if path.starts_with(PDF_PREFIX) {
                pdf_data = Some(data);
                continue;
            } else {
                if !path.starts_with(PAGES_PREFIX) {
                    warn!(path = %path, "Ignoring entry outside known package areas");
                }
                continue;
            };
            if rel == DOCUMENT_FILE_NAME {
                continue;
            }
            write_entry(staging.path(), &rel, &data)?;
        }

        let mut document = self.manifest.document.clone();
        let mut staged_pdf = None;
        if let (Some(pdf), Some(data)) = (self.manifest.pdf.clone(), pdf_data) {
            let actual = content_hash(&data);
            let expected = document.pdf_hash.clone().unwrap_or(pdf.sha256.clone());
            if actual != pdf.sha256 || actual != expected {
                return Err(PackageError::PdfHashMismatch { expected, actual });
            }

            let pdf_dir = dest.join(EMBEDDED_PDF_DIR);
            fs::create_dir_all(&pdf_dir).map_err(|e| PackageError::io_at(&pdf_dir, e))?;
            let file_name = format!("{target_stem}_{}", pdf.file_name);
            let out_path = pdf_dir.join(&file_name);

            // stays at its temp path until the bundle is in place
            let mut out = AtomicFile::create(&out_path)?;
            out.write_all(&data)
                .map_err(|e| PackageError::io_at(out.temp_path(), e))?;
            let on_disk =
                fs::read(out.temp_path()).map_err(|e| PackageError::io_at(out.temp_path(), e))?;
            let written = content_hash(&on_disk);
            if written != actual {
                return Err(PackageError::PdfHashMismatch {
                    expected: actual,
                    actual: written,
                });
            }

            document.pdf_path = Some(out_path.to_string_lossy().into_owned());
            document.pdf_relative_path = Some(format!("../{EMBEDDED_PDF_DIR}/{file_name}"));
            document.pdf_hash = Some(actual);
            staged_pdf = Some(out);
        }

        write_entry(
            staging.path(),
            DOCUMENT_FILE_NAME,
            document.to_json()?.as_bytes(),
        )?;

        if replace {
            fs::remove_dir_all(&target).map_err(|e| PackageError::io_at(&target, e))?;
        }
        staging.persist(&target)?;

        let pdf_path = match staged_pdf {
            Some(out) => {
                let path = out.final_path().to_path_buf();
                out.commit()?;
                Some(path)
            }
            None => None,
        };

        let bytes = directory_size(&target)?;
        info!(
            bundle = %target.display(),
            bytes,
            replaced = replace,
            "Package imported"
        );
        Ok(ExtractOutcome::Imported {
            bundle_path: target,
            bytes,
            pdf_path,
        })
    }
}

/// First free `Name (n).snb` in `dest`, n = 1..=1000.
pub fn unique_bundle_path(dest: &Path, stem: &str) -> Option<PathBuf> {
    (1..=MAX_RENAME_ATTEMPTS)
        .map(|n| dest.join(format!("{stem} ({n}).{BUNDLE_EXTENSION}")))
        .find(|candidate| !candidate.exists())
}

fn write_entry(root: &Path, rel: &str, data: &[u8]) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PackageError::io_at(parent, e))?;
    }
    fs::write(&path, data).map_err(|e| PackageError::io_at(&path, e))
}

/// Hidden extraction directory removed on drop unless persisted.
struct StagingDir {
    path: PathBuf,
    persisted: bool,
}

impl StagingDir {
    fn create(path: PathBuf) -> Result<Self> {
        if path.exists() {
            fs::remove_dir_all(&path).map_err(|e| PackageError::io_at(&path, e))?;
        }
        fs::create_dir_all(&path).map_err(|e| PackageError::io_at(&path, e))?;
        Ok(Self {
            path,
            persisted: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persist(mut self, target: &Path) -> Result<()> {
        fs::rename(&self.path, target).map_err(|e| PackageError::io_at(target, e))?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.persisted {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove staging directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{NotebookDocument, PageRef};
    use crate::writer::PackageWriter;
    use tempfile::TempDir;
    use zip::write::{FileOptions, ZipWriter};

    fn package_bytes() -> Vec<u8> {
        let mut doc = NotebookDocument::new("nb-r", "Reader");
        doc.pages = vec![PageRef::new("p1")];
        let mut writer = PackageWriter::new("Reader.snb", doc);
        writer.add_page_asset(0, "p1", "json", br#"{"strokes":[]}"#.to_vec());
        writer.add_file("extras/assets/img.png", vec![1, 2, 3]);
        writer.write_to_vec().unwrap().0
    }

    fn zip_with_manifest(manifest_json: &str) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options: FileOptions<'_, ()> = FileOptions::default();
            zip.start_file(MANIFEST_FILE_NAME, options).unwrap();
            zip.write_all(manifest_json.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    /// Re-archive `bytes` under an edited manifest, keeping every entry.
    fn repack(bytes: Vec<u8>, edit: impl FnOnce(&mut PackageManifest)) -> Vec<u8> {
        let mut source = PackageReader::from_bytes(bytes).unwrap();
        let mut manifest = source.manifest().clone();
        edit(&mut manifest);

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options: FileOptions<'_, ()> = FileOptions::default();
            zip.start_file(MANIFEST_FILE_NAME, options).unwrap();
            zip.write_all(manifest.to_json().unwrap().as_bytes()).unwrap();
            for file in &manifest.files {
                let data = source.read_raw(&file.path).unwrap();
                zip.start_file(file.path.as_str(), options).unwrap();
                zip.write_all(&data).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn package_with_pdf() -> Vec<u8> {
        let mut doc = NotebookDocument::new("nb-bio", "Bio");
        doc.pages = vec![PageRef::new("p1")];
        let mut writer = PackageWriter::new("Bio.snb", doc);
        writer.add_page_asset(0, "p1", "json", b"{}".to_vec());
        writer.embed_pdf("slides.pdf", b"%PDF-1.4 original".to_vec());
        writer.write_to_vec().unwrap().0
    }

    #[test]
    fn test_reader_opens_written_package() {
        let mut reader = PackageReader::from_bytes(package_bytes()).unwrap();
        assert_eq!(reader.manifest().notebook_id, "nb-r");
        assert!(reader.has_file("pages/nb-r/0000.json"));
        assert!(reader.verify_all().is_empty());
    }

    #[test]
    fn test_reader_missing_manifest() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options: FileOptions<'_, ()> = FileOptions::default();
            zip.start_file("other.txt", options).unwrap();
            zip.write_all(b"x").unwrap();
            zip.finish().unwrap();
        }
        let err = PackageReader::from_bytes(cursor.into_inner()).err().unwrap();
        assert!(matches!(err, PackageError::MissingFile(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn test_reader_unparsable_manifest() {
        let err = PackageReader::from_bytes(zip_with_manifest("{ nope"))
            .err()
            .unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn test_reader_future_version() {
        let reader = PackageReader::from_bytes(package_bytes()).unwrap();
        let mut manifest = reader.manifest().clone();
        manifest.package_version = 99;
        let err = PackageReader::from_bytes(zip_with_manifest(&manifest.to_json().unwrap()))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PackageError::UnsupportedVersion { version: 99, .. }
        ));
    }

    #[test]
    fn test_read_verified_detects_tamper() {
        let reader = PackageReader::from_bytes(package_bytes()).unwrap();
        let mut manifest = reader.manifest().clone();
        manifest.files[0].sha256 = "0".repeat(64);

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options: FileOptions<'_, ()> = FileOptions::default();
            zip.start_file(MANIFEST_FILE_NAME, options).unwrap();
            zip.write_all(manifest.to_json().unwrap().as_bytes()).unwrap();
            for file in &manifest.files {
                zip.start_file(file.path.as_str(), options).unwrap();
                zip.write_all(b"tampered").unwrap();
            }
            zip.finish().unwrap();
        }

        let mut tampered = PackageReader::from_bytes(cursor.into_inner()).unwrap();
        let path = tampered.manifest().files[0].path.clone();
        let err = tampered.read_verified(&path).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_target_bundle_name() {
        let reader = PackageReader::from_bytes(package_bytes()).unwrap();
        assert_eq!(reader.target_bundle_name("fallback"), "Reader.snb");
    }

    #[test]
    fn test_extract_and_policies() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path();

        let mut reader = PackageReader::from_bytes(package_bytes()).unwrap();
        let first = reader
            .extract_bundle(dest, "Reader", OverwritePolicy::Rename)
            .unwrap();
        let ExtractOutcome::Imported { bundle_path, bytes, pdf_path } = first else {
            panic!("expected import");
        };
        assert_eq!(bundle_path, dest.join("Reader.snb"));
        assert!(bytes > 0);
        assert!(pdf_path.is_none());
        assert!(bundle_path.join("pages/p1.json").is_file());
        assert!(bundle_path.join("assets/img.png").is_file());
        assert!(bundle_path.join(DOCUMENT_FILE_NAME).is_file());

        let skipped = reader
            .extract_bundle(dest, "Reader", OverwritePolicy::Skip)
            .unwrap();
        assert_eq!(
            skipped,
            ExtractOutcome::Skipped {
                existing: dest.join("Reader.snb")
            }
        );

        let renamed = reader
            .extract_bundle(dest, "Reader", OverwritePolicy::Rename)
            .unwrap();
        assert!(matches!(
            renamed,
            ExtractOutcome::Imported { ref bundle_path, .. } if bundle_path.ends_with("Reader (1).snb")
        ));

        fs::write(dest.join("Reader.snb/stale.txt"), "old").unwrap();
        reader
            .extract_bundle(dest, "Reader", OverwritePolicy::Overwrite)
            .unwrap();
        assert!(!dest.join("Reader.snb/stale.txt").exists());

        let leftovers: Vec<_> = fs::read_dir(dest)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".importing."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_page_id_outside_pages_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("lib");
        fs::create_dir_all(&dest).unwrap();

        let bytes = repack(package_bytes(), |m| {
            m.pages[0].page_id = "../../../escaped".to_string();
        });
        let err = PackageReader::from_bytes(bytes).err().unwrap();
        assert!(matches!(err, PackageError::UnsafeEntryPath(_)));
        assert!(err.is_validation());

        assert!(!tmp.path().join("escaped.json").exists());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn test_pdf_hash_mismatch_keeps_existing_bundle_and_pdf() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path();

        let mut reader = PackageReader::from_bytes(package_with_pdf()).unwrap();
        let ExtractOutcome::Imported {
            bundle_path,
            pdf_path: Some(pdf_path),
            ..
        } = reader
            .extract_bundle(dest, "Bio", OverwritePolicy::Overwrite)
            .unwrap()
        else {
            panic!("expected import with PDF");
        };
        let document_before = fs::read(bundle_path.join(DOCUMENT_FILE_NAME)).unwrap();

        // entry checksums still match, only the recorded PDF hash is wrong
        let bogus = format!("sha256:{}", "0".repeat(64));
        let tampered = repack(package_with_pdf(), |m| {
            if let Some(pdf) = m.pdf.as_mut() {
                pdf.sha256 = bogus.clone();
            }
            m.document.pdf_hash = Some(bogus.clone());
        });
        let mut reader = PackageReader::from_bytes(tampered).unwrap();
        let err = reader
            .extract_bundle(dest, "Bio", OverwritePolicy::Overwrite)
            .unwrap_err();
        assert!(err.is_integrity());

        assert_eq!(
            fs::read(bundle_path.join(DOCUMENT_FILE_NAME)).unwrap(),
            document_before
        );
        assert_eq!(fs::read(&pdf_path).unwrap(), b"%PDF-1.4 original");
        let pdf_dir_entries: Vec<String> = fs::read_dir(dest.join(EMBEDDED_PDF_DIR))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(pdf_dir_entries, vec!["Bio_slides.pdf"]);
    }

    #[test]
    fn test_overwrite_policy_parse() {
        assert_eq!("SKIP".parse::<OverwritePolicy>(), Ok(OverwritePolicy::Skip));
        assert_eq!(OverwritePolicy::default(), OverwritePolicy::Rename);
        assert!("merge".parse::<OverwritePolicy>().is_err());
    }

    #[test]
    fn test_unique_bundle_path() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("A (1).snb")).unwrap();
        let next = unique_bundle_path(tmp.path(), "A").unwrap();
        assert!(next.ends_with("A (2).snb"));
    }
}
