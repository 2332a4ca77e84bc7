//! Shared fixtures for nb-core integration tests.

#![allow(dead_code)]

use nb_package::{LayoutMode, NotebookDocument, PageRef, DOCUMENT_FILE_NAME};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

/// Write a paged bundle `<root>/<name>.snb` with `pages` blank pages.
pub fn paged_bundle(root: &Path, name: &str, pages: usize) -> PathBuf {
    let mut doc = NotebookDocument::new(format!("nb-{}", name.to_lowercase()), name);
    doc.pages = (0..pages).map(|i| PageRef::new(format!("page-{i}"))).collect();
    doc.extra.insert("tool_state".into(), json!({"pen": "black", "width": 2}));
    write_bundle(root, name, &doc)
}

/// Write an edgeless bundle, which has no fixed pages to rasterize.
pub fn edgeless_bundle(root: &Path, name: &str) -> PathBuf {
    let mut doc = NotebookDocument::new(format!("nb-{}", name.to_lowercase()), name);
    doc.mode = LayoutMode::Edgeless;
    doc.pages = vec![PageRef::new("canvas")];
    write_bundle(root, name, &doc)
}

/// Paged bundle with a linked PDF next to it.
pub fn bundle_with_pdf(root: &Path, name: &str, pages: usize) -> PathBuf {
    let pdf = root.join(format!("{name}-source.pdf"));
    fs::write(&pdf, b"%PDF-1.4\n% source\n%%EOF\n").unwrap();

    let bundle = paged_bundle(root, name, pages);
    let doc_path = bundle.join(DOCUMENT_FILE_NAME);
    let mut doc = NotebookDocument::from_json(&fs::read_to_string(&doc_path).unwrap()).unwrap();
    doc.pdf_path = Some(pdf.to_string_lossy().into_owned());
    fs::write(&doc_path, doc.to_json().unwrap()).unwrap();
    bundle
}

/// A `.snb` directory whose `document.json` does not parse.
pub fn broken_bundle(root: &Path, name: &str) -> PathBuf {
    let bundle = root.join(format!("{name}.snb"));
    fs::create_dir_all(&bundle).unwrap();
    fs::write(bundle.join(DOCUMENT_FILE_NAME), "{ not json").unwrap();
    bundle
}

fn write_bundle(root: &Path, name: &str, doc: &NotebookDocument) -> PathBuf {
    let bundle = root.join(format!("{name}.snb"));
    fs::create_dir_all(bundle.join("pages")).unwrap();
    fs::write(bundle.join(DOCUMENT_FILE_NAME), doc.to_json().unwrap()).unwrap();
    for page in &doc.pages {
        fs::write(
            bundle.join("pages").join(format!("{}.json", page.id)),
            format!(r#"{{"strokes":[],"id":"{}"}}"#, page.id),
        )
        .unwrap();
    }
    bundle
}

/// Names of regular files directly inside `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
