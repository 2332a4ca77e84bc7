//! No-mock package integration tests.
//!
//! Exercises real bundles on disk:
//! - Bundle -> package -> bundle round-trip preserves the document
//! - Embedded PDF is restored under `embedded/` with a matching hash
//! - A tampered embedded PDF fails with an integrity error
//! - Unreadable linked PDFs degrade to a warning
//! - Failed writes and imports leave nothing at the final path

use nb_package::{
    content_hash, ExtractOutcome, NotebookBundle, NotebookDocument, OverwritePolicy,
    PackageError, PackageReader, PackageWriter, PageRef, DOCUMENT_FILE_NAME,
};
use serde_json::json;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::{FileOptions, ZipWriter};

// ============================================================================
// Helpers
// ============================================================================

/// Build a two-page bundle with a linked PDF sitting next to it.
fn build_bundle(root: &Path, name: &str, with_pdf: bool) -> PathBuf {
    let bundle = root.join(format!("{name}.snb"));
    fs::create_dir_all(bundle.join("pages")).unwrap();
    fs::create_dir_all(bundle.join("assets")).unwrap();

    let mut doc = NotebookDocument::new(format!("nb-{name}"), name);
    doc.pages = vec![PageRef::new("page-a"), PageRef::new("page-b")];
    doc.extra.insert("tool_state".into(), json!({"pen": "blue"}));
    if with_pdf {
        let pdf = root.join(format!("{name}-source.pdf"));
        fs::write(&pdf, b"%PDF-1.4\n% fake pdf body\n%%EOF\n").unwrap();
        doc.pdf_path = Some(pdf.to_string_lossy().into_owned());
    }
    fs::write(bundle.join(DOCUMENT_FILE_NAME), doc.to_json().unwrap()).unwrap();

    fs::write(bundle.join("pages/page-a.json"), r#"{"strokes":[1,2,3]}"#).unwrap();
    fs::write(bundle.join("pages/page-a.jpg"), [0xff, 0xd8, 0xff, 0xd9]).unwrap();
    fs::write(bundle.join("pages/page-b.json"), r#"{"strokes":[]}"#).unwrap();
    fs::write(bundle.join("assets/sticker.png"), [9u8; 32]).unwrap();
    bundle
}

fn count_page_assets(bundle: &Path) -> usize {
    fs::read_dir(bundle.join("pages")).unwrap().count()
}

// ============================================================================
// Round-trip
// ============================================================================

#[test]
fn roundtrip_preserves_document_and_assets() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let bundle_path = build_bundle(src.path(), "Physics", false);
    let package_path = src.path().join("Physics.snbx");

    let bundle = NotebookBundle::open(&bundle_path).unwrap();
    let writer = PackageWriter::from_bundle(&bundle, false).unwrap();
    assert!(writer.warnings().is_empty());
    writer.write_atomic(&package_path).unwrap();

    let mut reader = PackageReader::open(&package_path).unwrap();
    let outcome = reader
        .extract_bundle(dest.path(), "Physics", OverwritePolicy::Skip)
        .unwrap();
    let ExtractOutcome::Imported { bundle_path: restored, .. } = outcome else {
        panic!("expected import, got {outcome:?}");
    };

    let original = NotebookBundle::open(&bundle_path).unwrap();
    let imported = NotebookBundle::open(&restored).unwrap();
    assert_eq!(imported.document().notebook_id, original.document().notebook_id);
    assert_eq!(imported.document().pages, original.document().pages);
    assert_eq!(imported.document().extra, original.document().extra);
    assert_eq!(count_page_assets(&restored), count_page_assets(&bundle_path));
    assert_eq!(
        fs::read(restored.join("assets/sticker.png")).unwrap(),
        vec![9u8; 32]
    );
}

#[test]
fn embedded_pdf_is_restored_and_relinked() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let bundle_path = build_bundle(src.path(), "History", true);
    let package_path = src.path().join("History.snbx");

    let bundle = NotebookBundle::open(&bundle_path).unwrap();
    let (manifest, _) = PackageWriter::from_bundle(&bundle, true)
        .unwrap()
        .write_atomic(&package_path)
        .unwrap();
    let pdf = manifest.pdf.clone().unwrap();
    assert_eq!(pdf.file_name, "History-source.pdf");

    // The source machine's PDF disappears; the package must be self-contained.
    fs::remove_file(src.path().join("History-source.pdf")).unwrap();

    let mut reader = PackageReader::open(&package_path).unwrap();
    let outcome = reader
        .extract_bundle(dest.path(), "History", OverwritePolicy::Rename)
        .unwrap();
    let ExtractOutcome::Imported {
        bundle_path,
        pdf_path: Some(pdf_path),
        ..
    } = outcome
    else {
        panic!("expected import with pdf, got {outcome:?}");
    };

    assert_eq!(
        pdf_path,
        dest.path().join("embedded").join("History_History-source.pdf")
    );
    let restored = NotebookBundle::open(&bundle_path).unwrap();
    assert_eq!(restored.linked_pdf().as_deref(), Some(pdf_path.as_path()));
    assert_eq!(
        restored.document().pdf_hash.as_deref(),
        Some(content_hash(&fs::read(&pdf_path).unwrap()).as_str())
    );
}

#[test]
fn missing_linked_pdf_is_a_warning() {
    let src = TempDir::new().unwrap();
    let bundle_path = build_bundle(src.path(), "Chem", true);
    fs::remove_file(src.path().join("Chem-source.pdf")).unwrap();

    let bundle = NotebookBundle::open(&bundle_path).unwrap();
    let writer = PackageWriter::from_bundle(&bundle, true).unwrap();
    assert_eq!(writer.warnings().len(), 1);
    assert!(writer.manifest().pdf.is_none());
}

// ============================================================================
// Integrity
// ============================================================================

#[test]
fn tampered_pdf_hash_fails_import_and_leaves_no_bundle() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let bundle_path = build_bundle(src.path(), "Bio", true);
    let bundle = NotebookBundle::open(&bundle_path).unwrap();
    let (bytes, _) = PackageWriter::from_bundle(&bundle, true)
        .unwrap()
        .write_to_vec()
        .unwrap();

    // Rebuild the archive with a manifest whose declared PDF hash is wrong but
    // whose per-entry checksums still match.
    let reader = PackageReader::from_bytes(bytes.clone()).unwrap();
    let mut manifest = reader.manifest().clone();
    let bogus = format!("sha256:{}", "ab".repeat(32));
    manifest.pdf.as_mut().unwrap().sha256 = bogus.clone();
    manifest.document.pdf_hash = Some(bogus);

    let mut source = PackageReader::from_bytes(bytes).unwrap();
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        let options: FileOptions<'_, ()> = FileOptions::default();
        zip.start_file("manifest.json", options).unwrap();
        zip.write_all(manifest.to_json().unwrap().as_bytes()).unwrap();
        for file in manifest.files.clone() {
            let data = source.read_raw(&file.path).unwrap();
            zip.start_file(file.path.as_str(), options).unwrap();
            zip.write_all(&data).unwrap();
        }
        zip.finish().unwrap();
    }

    let mut tampered = PackageReader::from_bytes(cursor.into_inner()).unwrap();
    let err = tampered
        .extract_bundle(dest.path(), "Bio", OverwritePolicy::Rename)
        .unwrap_err();
    assert!(matches!(err, PackageError::PdfHashMismatch { .. }));
    assert!(err.is_integrity());
    assert!(!dest.path().join("Bio.snb").exists());
}

// ============================================================================
// Atomicity
// ============================================================================

#[test]
fn missing_output_directory_leaves_no_package() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bundle_path = build_bundle(src.path(), "Math", false);
    let bundle = NotebookBundle::open(&bundle_path).unwrap();

    // parent of the target does not exist, so the temp file cannot be created
    let target = out.path().join("gone").join("Math.snbx");
    let writer = PackageWriter::from_bundle(&bundle, false).unwrap();
    assert!(writer.write_atomic(&target).is_err());
    assert!(!target.exists());
}

#[test]
fn interrupted_write_leaves_only_temp_artifact() {
    let out = TempDir::new().unwrap();
    let target = out.path().join("Half.snbx");
    {
        let mut partial = nb_package::AtomicFile::create(&target).unwrap();
        partial.write_all(b"PK\x03\x04 partial").unwrap();
        assert!(partial.temp_path().exists());
        assert!(!target.exists());
    }
    assert!(!target.exists());
}
