//! Batch export of notebook bundles to `.snbx` packages.

use super::engine::{run_batch, BatchError, BatchProgress, BatchResult, FileError, FileOutcome, Operation};
use super::output_path::OutputTarget;
use crate::cancel::CancellationToken;
use nb_package::{NotebookBundle, PackageWriter, PACKAGE_EXTENSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Options for [`export_package_batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportPackageOptions {
    /// Output directory, or the output file when exporting a single bundle.
    /// Defaults to `<temp>/notebook-exports`.
    pub output: Option<PathBuf>,
    /// Embed the linked PDF so the package is self-contained.
    pub include_pdf: bool,
    pub overwrite: bool,
    pub dry_run: bool,
}

impl Default for ExportPackageOptions {
    fn default() -> Self {
        Self {
            output: None,
            include_pdf: true,
            overwrite: false,
            dry_run: false,
        }
    }
}

impl ExportPackageOptions {
    pub fn output_or_default(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("notebook-exports"))
    }
}

/// Package each bundle in `bundles`, in order.
pub fn export_package_batch(
    bundles: &[PathBuf],
    options: &ExportPackageOptions,
    progress: &mut dyn BatchProgress,
    cancel: &CancellationToken,
) -> Result<BatchResult, BatchError> {
    if bundles.is_empty() {
        return Ok(BatchResult::empty(Operation::ExportPackage, options.dry_run));
    }

    let target = OutputTarget::resolve(
        &options.output_or_default(),
        bundles.len(),
        PACKAGE_EXTENSION,
    );
    target.prepare(options.dry_run)?;

    Ok(run_batch(
        Operation::ExportPackage,
        bundles,
        options.dry_run,
        progress,
        cancel,
        |bundle| export_one(bundle, &target.path_for(bundle, PACKAGE_EXTENSION), options),
    ))
}

fn export_one(
    bundle_path: &Path,
    output: &Path,
    options: &ExportPackageOptions,
) -> Result<FileOutcome, FileError> {
    let bundle = NotebookBundle::open(bundle_path)?;

    if output.exists() && !options.overwrite {
        return Ok(FileOutcome::Skipped {
            reason: "output already exists".to_string(),
        });
    }

    let writer = PackageWriter::from_bundle(&bundle, options.include_pdf)?;
    let note = (!writer.warnings().is_empty()).then(|| writer.warnings().join("; "));
    let pages = Some(bundle.document().page_count());

    if options.dry_run {
        return Ok(FileOutcome::Done {
            output: output.to_path_buf(),
            bytes: writer.total_bytes(),
            pages,
            note,
        });
    }

    let (_, bytes) = writer.write_atomic(output)?;
    Ok(FileOutcome::Done {
        output: output.to_path_buf(),
        bytes,
        pages,
        note,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::engine::{no_progress, FileStatus};
    use nb_package::{NotebookDocument, PackageReader, PageRef, DOCUMENT_FILE_NAME};
    use std::fs;
    use tempfile::TempDir;

    fn make_bundle(dir: &Path, name: &str, pdf: Option<&Path>) -> PathBuf {
        let root = dir.join(format!("{name}.snb"));
        fs::create_dir_all(root.join("pages")).unwrap();
        let mut doc = NotebookDocument::new(format!("id-{name}"), name);
        doc.pages = vec![PageRef::new("p0"), PageRef::new("p1")];
        doc.pdf_path = pdf.map(|p| p.to_string_lossy().into_owned());
        fs::write(root.join(DOCUMENT_FILE_NAME), doc.to_json().unwrap()).unwrap();
        fs::write(root.join("pages/p0.json"), br#"{"strokes":[]}"#).unwrap();
        fs::write(root.join("pages/p1.json"), br#"{"strokes":[1]}"#).unwrap();
        root
    }

    #[test]
    fn test_export_embeds_pdf() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("source.pdf");
        fs::write(&pdf, b"%PDF-1.4 source").unwrap();
        let a = make_bundle(tmp.path(), "A", Some(&pdf));
        let out = tmp.path().join("out");

        let result = export_package_batch(
            &[a],
            &ExportPackageOptions {
                output: Some(out.clone()),
                ..Default::default()
            },
            &mut no_progress(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(result.results[0].status, FileStatus::Success);
        assert!(result.results[0].message.is_empty());
        let reader = PackageReader::open(&out.join("A.snbx")).unwrap();
        assert!(reader.manifest().pdf.is_some());
        assert_eq!(reader.manifest().page_asset_count(), 2);
    }

    #[test]
    fn test_missing_pdf_is_warning_not_failure() {
        let tmp = TempDir::new().unwrap();
        let a = make_bundle(tmp.path(), "A", Some(&tmp.path().join("gone.pdf")));
        let out = tmp.path().join("A.snbx");

        let result = export_package_batch(
            &[a],
            &ExportPackageOptions {
                output: Some(out.clone()),
                ..Default::default()
            },
            &mut no_progress(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(result.succeeded, 1);
        assert!(result.results[0].message.contains("PDF not embedded"));
        assert!(out.is_file());
    }

    #[test]
    fn test_invalid_bundle_fails_only_itself() {
        let tmp = TempDir::new().unwrap();
        let good = make_bundle(tmp.path(), "Good", None);
        let bad = tmp.path().join("Bad.snb");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join(DOCUMENT_FILE_NAME), b"{ not json").unwrap();

        let result = export_package_batch(
            &[bad, good],
            &ExportPackageOptions {
                output: Some(tmp.path().join("out")),
                ..Default::default()
            },
            &mut no_progress(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(result.results[0].status, FileStatus::Failed);
        assert_eq!(result.results[1].status, FileStatus::Success);
        assert!(tmp.path().join("out/Good.snbx").is_file());
    }

    #[test]
    fn test_dry_run_estimates_without_writing() {
        let tmp = TempDir::new().unwrap();
        let a = make_bundle(tmp.path(), "A", None);
        let out = tmp.path().join("out");
        let result = export_package_batch(
            &[a],
            &ExportPackageOptions {
                output: Some(out.clone()),
                dry_run: true,
                ..Default::default()
            },
            &mut no_progress(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(result.results[0].output_bytes, Some(14 + 15));
        assert!(!out.exists());
    }
}
