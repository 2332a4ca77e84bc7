//! No-mock batch engine tests.
//!
//! Runs the three batch entry points against real bundles in temp
//! directories with the built-in rasterizer:
//! - one bad bundle never stops the others
//! - a token set mid-batch cancels the rest
//! - edgeless notebooks are skipped, not failed
//! - dry runs write nothing
//! - failed writes leave nothing at the final path
//! - export then import reproduces the document

mod common;

use common::{broken_bundle, bundle_with_pdf, edgeless_bundle, file_names, paged_bundle};
use nb_core::batch::{
    export_package_batch, export_pdf_batch, import_package_batch, no_progress, BatchError,
    BatchOutcome, ErrorKind, ExportPackageOptions, ExportPdfOptions, FileResult, FileStatus,
    ImportOptions, CANCELLED_MESSAGE,
};
use nb_core::render::{
    AssetRasterizer, Rasterizer, RenderError, RenderSettings, RenderedPage,
};
use nb_core::CancellationToken;
use nb_package::{NotebookBundle, NotebookDocument, OverwritePolicy, DOCUMENT_FILE_NAME};
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

fn pdf_options(out: &Path) -> ExportPdfOptions {
    ExportPdfOptions {
        output: Some(out.to_path_buf()),
        ..ExportPdfOptions::default()
    }
}

fn statuses(results: &[FileResult]) -> Vec<FileStatus> {
    results.iter().map(|r| r.status).collect()
}

/// Rasterizer that fails on one page of every document.
struct FailingPage(usize);

impl Rasterizer for FailingPage {
    fn render_page(
        &self,
        bundle: &NotebookBundle,
        page_index: usize,
        settings: &RenderSettings,
    ) -> Result<RenderedPage, RenderError> {
        if page_index == self.0 {
            return Err(RenderError::Page {
                page: page_index,
                reason: "ink layer unreadable".into(),
            });
        }
        AssetRasterizer.render_page(bundle, page_index, settings)
    }
}

// ============================================================================
// PDF export
// ============================================================================

#[test]
fn corrupt_middle_bundle_does_not_stop_the_batch() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bundles = vec![
        paged_bundle(src.path(), "A", 2),
        broken_bundle(src.path(), "B"),
        paged_bundle(src.path(), "C", 1),
    ];

    let result = export_pdf_batch(
        &bundles,
        &pdf_options(out.path()),
        &AssetRasterizer,
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(
        statuses(&result.results),
        vec![FileStatus::Success, FileStatus::Failed, FileStatus::Success]
    );
    assert_eq!(result.results[1].error_kind, Some(ErrorKind::Validation));
    assert_eq!(result.outcome, BatchOutcome::PartialFailure);
    assert_eq!(file_names(out.path()), vec!["A.pdf", "C.pdf"]);

    let pdf = fs::read(out.path().join("C.pdf")).unwrap();
    assert!(pdf.starts_with(b"%PDF-"));
    assert_eq!(result.results[2].output_bytes, Some(pdf.len() as u64));
}

#[test]
fn cancel_after_first_file_marks_rest_cancelled() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bundles: Vec<PathBuf> = ["A", "B", "C"]
        .iter()
        .map(|n| paged_bundle(src.path(), n, 1))
        .collect();

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let mut progress = move |_: &str, index: usize, _: usize| {
        // file 1 has started; the token is checked before file 2
        if index == 1 {
            token.cancel();
        }
    };

    let result = export_pdf_batch(
        &bundles,
        &pdf_options(out.path()),
        &AssetRasterizer,
        &mut progress,
        &cancel,
    )
    .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.outcome, BatchOutcome::Cancelled);
    assert_eq!(result.results.len(), 3);
    assert_eq!(result.results[0].status, FileStatus::Success);
    for r in &result.results[1..] {
        assert_eq!(r.status, FileStatus::Skipped);
        assert_eq!(r.message, CANCELLED_MESSAGE);
        assert!(r.is_cancelled());
    }
    assert_eq!(result.cancelled_count, 2);
    assert_eq!(file_names(out.path()), vec!["A.pdf"]);
}

#[test]
fn edgeless_notebook_is_skipped() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bundles = vec![
        paged_bundle(src.path(), "A", 3),
        edgeless_bundle(src.path(), "B"),
    ];

    let mut opts = pdf_options(out.path());
    opts.dpi = 150;
    let result = export_pdf_batch(
        &bundles,
        &opts,
        &AssetRasterizer,
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!((result.succeeded, result.skipped, result.failed), (1, 1, 0));
    assert_eq!(result.results[0].status, FileStatus::Success);
    assert_eq!(result.results[0].pages, Some(3));
    assert_eq!(result.results[1].status, FileStatus::Skipped);
    assert_eq!(result.results[1].message, "unsupported layout");
    assert_eq!(result.outcome, BatchOutcome::Success);
}

#[test]
fn page_range_limits_exported_pages() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bundles = vec![paged_bundle(src.path(), "Long", 6)];

    let mut opts = pdf_options(out.path());
    opts.page_range = "3-2, x".to_string();
    let result = export_pdf_batch(
        &bundles,
        &opts,
        &AssetRasterizer,
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();

    let file = &result.results[0];
    assert_eq!(file.status, FileStatus::Success);
    assert_eq!(file.pages, Some(2));
    assert!(file.message.contains("ignored page range parts"));
}

#[test]
fn existing_output_is_skipped_unless_overwrite() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bundles = vec![paged_bundle(src.path(), "A", 1)];
    fs::write(out.path().join("A.pdf"), b"keep me").unwrap();

    let mut opts = pdf_options(out.path());
    let result = export_pdf_batch(
        &bundles,
        &opts,
        &AssetRasterizer,
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(result.results[0].status, FileStatus::Skipped);
    assert_eq!(fs::read(out.path().join("A.pdf")).unwrap(), b"keep me");

    opts.overwrite = true;
    let result = export_pdf_batch(
        &bundles,
        &opts,
        &AssetRasterizer,
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(result.results[0].status, FileStatus::Success);
    assert!(fs::read(out.path().join("A.pdf")).unwrap().starts_with(b"%PDF-"));
}

#[test]
fn render_failure_leaves_no_output() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bundles = vec![paged_bundle(src.path(), "A", 3)];

    let result = export_pdf_batch(
        &bundles,
        &pdf_options(out.path()),
        &FailingPage(1),
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(result.results[0].status, FileStatus::Failed);
    assert_eq!(result.results[0].error_kind, Some(ErrorKind::Render));
    assert_eq!(result.outcome, BatchOutcome::TotalFailure);
    // neither the final file nor the temp file survives
    assert!(file_names(out.path()).is_empty());
}

#[test]
fn single_input_with_file_output_writes_that_file() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let target = out.path().join("handout.pdf");
    let bundles = vec![paged_bundle(src.path(), "Lecture", 1)];

    let result = export_pdf_batch(
        &bundles,
        &pdf_options(&target),
        &AssetRasterizer,
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(result.results[0].output_path.as_deref(), Some(target.as_path()));
    assert!(target.is_file());
}

#[test]
fn invalid_dpi_is_rejected_before_any_file() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bundles = vec![paged_bundle(src.path(), "A", 1)];

    let mut opts = pdf_options(out.path());
    opts.dpi = 5;
    let err = export_pdf_batch(
        &bundles,
        &opts,
        &AssetRasterizer,
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, BatchError::InvalidOptions(_)));
    assert!(file_names(out.path()).is_empty());
}

#[test]
fn unwritable_output_directory_aborts_batch() {
    let src = TempDir::new().unwrap();
    let blocker = src.path().join("not-a-dir");
    fs::write(&blocker, b"file").unwrap();
    let bundles = vec![paged_bundle(src.path(), "A", 1), paged_bundle(src.path(), "B", 1)];

    let err = export_pdf_batch(
        &bundles,
        &pdf_options(&blocker.join("out")),
        &AssetRasterizer,
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, BatchError::OutputDirectory { .. }));
}

#[test]
fn fail_fast_stops_after_first_failure() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bundles = vec![
        broken_bundle(src.path(), "A"),
        paged_bundle(src.path(), "B", 1),
    ];

    struct StopOnFailure;
    impl nb_core::batch::BatchProgress for StopOnFailure {
        fn file_started(&mut self, _: &str, _: usize, _: usize) {}
        fn file_finished(&mut self, _: usize, _: usize, r: &FileResult) -> ControlFlow<()> {
            if r.status == FileStatus::Failed {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }

    let result = export_pdf_batch(
        &bundles,
        &pdf_options(out.path()),
        &AssetRasterizer,
        &mut StopOnFailure,
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(statuses(&result.results), vec![FileStatus::Failed, FileStatus::Skipped]);
    assert!(!result.cancelled);
    assert!(file_names(out.path()).is_empty());
}

// ============================================================================
// Dry run
// ============================================================================

#[test]
fn dry_run_writes_nothing() {
    let src = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let out = root.path().join("exports");
    let bundles = vec![paged_bundle(src.path(), "A", 2), bundle_with_pdf(src.path(), "B", 1)];

    let mut opts = pdf_options(&out);
    opts.dry_run = true;
    let pdf = export_pdf_batch(
        &bundles,
        &opts,
        &AssetRasterizer,
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();
    assert!(pdf.dry_run);
    assert_eq!(pdf.succeeded, 2);
    assert!(pdf.total_output_bytes > 0);

    let package = export_package_batch(
        &bundles,
        &ExportPackageOptions {
            output: Some(out.clone()),
            dry_run: true,
            ..ExportPackageOptions::default()
        },
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(package.succeeded, 2);
    assert!(!out.exists());
}

// ============================================================================
// Package export and import
// ============================================================================

#[test]
fn package_roundtrip_preserves_document() {
    let src = TempDir::new().unwrap();
    let packages = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let bundle = bundle_with_pdf(src.path(), "Physics", 3);

    let export = export_package_batch(
        &[bundle.clone()],
        &ExportPackageOptions {
            output: Some(packages.path().to_path_buf()),
            ..ExportPackageOptions::default()
        },
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(export.outcome, BatchOutcome::Success);
    let package = export.results[0].output_path.clone().unwrap();
    assert_eq!(package, packages.path().join("Physics.snbx"));

    let import = import_package_batch(
        &[package],
        &ImportOptions {
            destination: Some(dest.path().to_path_buf()),
            ..ImportOptions::default()
        },
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(import.outcome, BatchOutcome::Success);
    let imported = import.results[0].output_path.clone().unwrap();
    assert_eq!(imported, dest.path().join("Physics.snb"));
    assert!(import.results[0].message.contains("PDF restored"));

    let read_doc = |root: &Path| {
        NotebookDocument::from_json(&fs::read_to_string(root.join(DOCUMENT_FILE_NAME)).unwrap())
            .unwrap()
    };
    let original = read_doc(&bundle);
    let restored = read_doc(&imported);
    assert_eq!(restored.name, original.name);
    assert_eq!(restored.pages, original.pages);
    assert_eq!(restored.page_size, original.page_size);
    assert_eq!(restored.extra, original.extra);
    assert_eq!(
        file_names(&imported.join("pages")).len(),
        file_names(&bundle.join("pages")).len()
    );
}

#[test]
fn import_policies_on_name_collision() {
    let src = TempDir::new().unwrap();
    let packages = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let bundle = paged_bundle(src.path(), "Notes", 1);

    let export = export_package_batch(
        &[bundle],
        &ExportPackageOptions {
            output: Some(packages.path().to_path_buf()),
            include_pdf: false,
            ..ExportPackageOptions::default()
        },
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();
    let package = export.results[0].output_path.clone().unwrap();

    let import = |policy: OverwritePolicy| {
        import_package_batch(
            &[package.clone()],
            &ImportOptions {
                destination: Some(dest.path().to_path_buf()),
                overwrite_policy: policy,
                dry_run: false,
            },
            &mut no_progress(),
            &CancellationToken::new(),
        )
        .unwrap()
    };

    assert_eq!(import(OverwritePolicy::Rename).succeeded, 1);
    let second = import(OverwritePolicy::Rename);
    assert_eq!(
        second.results[0].output_path.as_deref(),
        Some(dest.path().join("Notes (1).snb").as_path())
    );
    let skipped = import(OverwritePolicy::Skip);
    assert_eq!(skipped.results[0].status, FileStatus::Skipped);
    assert_eq!(skipped.outcome, BatchOutcome::Success);
}

#[test]
fn corrupt_package_fails_only_itself() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let good = {
        let bundle = paged_bundle(src.path(), "Good", 1);
        let export = export_package_batch(
            &[bundle],
            &ExportPackageOptions {
                output: Some(src.path().to_path_buf()),
                ..ExportPackageOptions::default()
            },
            &mut no_progress(),
            &CancellationToken::new(),
        )
        .unwrap();
        export.results[0].output_path.clone().unwrap()
    };
    let bad = src.path().join("Bad.snbx");
    fs::write(&bad, b"PK\x03\x04 truncated").unwrap();

    let result = import_package_batch(
        &[bad, good],
        &ImportOptions {
            destination: Some(dest.path().to_path_buf()),
            ..ImportOptions::default()
        },
        &mut no_progress(),
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(statuses(&result.results), vec![FileStatus::Failed, FileStatus::Success]);
    assert_eq!(result.outcome, BatchOutcome::PartialFailure);
    assert!(dest.path().join("Good.snb").is_dir());
    assert!(!dest.path().join("Bad.snb").exists());
}
