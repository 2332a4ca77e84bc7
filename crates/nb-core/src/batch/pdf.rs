//! Batch export of notebook bundles to PDF.

use super::engine::{run_batch, BatchError, BatchProgress, BatchResult, FileError, FileOutcome, Operation};
use super::output_path::OutputTarget;
use crate::cancel::CancellationToken;
use crate::render::{
    parse_page_range, PdfDocumentWriter, PdfMetadata, Rasterizer, RenderSettings, MAX_DPI,
    MIN_DPI,
};
use nb_package::{AtomicFile, NotebookBundle};
use serde::{Deserialize, Serialize};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extension of PDF artifacts.
pub const PDF_EXTENSION: &str = "pdf";

/// Options for [`export_pdf_batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportPdfOptions {
    /// Output directory, or the output file when exporting a single bundle.
    /// Defaults to `<temp>/notebook-exports`.
    pub output: Option<PathBuf>,
    pub dpi: u32,
    /// Page range expression (`"1-3,5"`); empty means all pages.
    pub page_range: String,
    pub annotations_only: bool,
    pub include_metadata: bool,
    pub include_outline: bool,
    pub overwrite: bool,
    pub dry_run: bool,
}

impl Default for ExportPdfOptions {
    fn default() -> Self {
        Self {
            output: None,
            dpi: 150,
            page_range: String::new(),
            annotations_only: false,
            include_metadata: true,
            include_outline: true,
            overwrite: false,
            dry_run: false,
        }
    }
}

impl ExportPdfOptions {
    pub fn output_or_default(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("notebook-exports"))
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if !(MIN_DPI..=MAX_DPI).contains(&self.dpi) {
            return Err(BatchError::InvalidOptions(format!(
                "dpi {} outside {MIN_DPI}..={MAX_DPI}",
                self.dpi
            )));
        }
        Ok(())
    }

    fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            dpi: self.dpi,
            annotations_only: self.annotations_only,
        }
    }
}

/// Export each bundle in `bundles` to a PDF, in order.
///
/// Per-file failures are recorded in the result; only invalid options or an
/// output directory that cannot be created return `Err`.
pub fn export_pdf_batch(
    bundles: &[PathBuf],
    options: &ExportPdfOptions,
    rasterizer: &dyn Rasterizer,
    progress: &mut dyn BatchProgress,
    cancel: &CancellationToken,
) -> Result<BatchResult, BatchError> {
    options.validate()?;
    if bundles.is_empty() {
        return Ok(BatchResult::empty(Operation::ExportPdf, options.dry_run));
    }

    let target = OutputTarget::resolve(&options.output_or_default(), bundles.len(), PDF_EXTENSION);
    target.prepare(options.dry_run)?;

    Ok(run_batch(
        Operation::ExportPdf,
        bundles,
        options.dry_run,
        progress,
        cancel,
        |bundle| export_one(bundle, &target.path_for(bundle, PDF_EXTENSION), options, rasterizer),
    ))
}

fn export_one(
    bundle_path: &Path,
    output: &Path,
    options: &ExportPdfOptions,
    rasterizer: &dyn Rasterizer,
) -> Result<FileOutcome, FileError> {
    let bundle = NotebookBundle::open(bundle_path)?;
    let doc = bundle.document();

    if doc.is_edgeless() {
        debug!(path = %bundle_path.display(), "Edgeless notebook skipped");
        return Ok(FileOutcome::Skipped {
            reason: "unsupported layout".to_string(),
        });
    }

    let selection = parse_page_range(&options.page_range, doc.page_count());
    if selection.is_empty() {
        return Err(FileError::Validation(if doc.page_count() == 0 {
            "notebook has no pages".to_string()
        } else {
            format!("no valid pages in range '{}'", options.page_range)
        }));
    }

    if output.exists() && !options.overwrite {
        return Ok(FileOutcome::Skipped {
            reason: "output already exists".to_string(),
        });
    }

    let note = (!selection.invalid_parts.is_empty())
        .then(|| format!("ignored page range parts: {}", selection.invalid_parts.join(", ")));

    if options.dry_run {
        return Ok(FileOutcome::Done {
            output: output.to_path_buf(),
            bytes: estimate_pdf_bytes(&bundle, selection.pages.len(), options.dpi),
            pages: Some(selection.pages.len()),
            note,
        });
    }

    let settings = options.render_settings();
    let mut writer = PdfDocumentWriter::new();
    for &index in &selection.pages {
        let page = rasterizer.render_page(&bundle, index, &settings)?;
        writer.add_page(&page)?;
    }

    let metadata = options.include_metadata.then(|| {
        PdfMetadata::new(bundle.display_name()).with_subject(doc.notebook_id.clone())
    });
    let outline: Option<Vec<String>> = options
        .include_outline
        .then(|| selection.pages.iter().map(|i| format!("Page {}", i + 1)).collect());

    // nothing touches the output path until every page rendered
    let mut buffered = BufWriter::new(AtomicFile::create(output)?);
    writer.finish(&mut buffered, metadata.as_ref(), outline.as_deref())?;
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    let bytes = file.commit()?;

    Ok(FileOutcome::Done {
        output: output.to_path_buf(),
        bytes,
        pages: Some(selection.pages.len()),
        note,
    })
}

/// Rough PDF size for a dry run: pre-rendered rasters count as-is, other
/// pages as a compressed image at the requested resolution.
fn estimate_pdf_bytes(bundle: &NotebookBundle, pages: usize, dpi: u32) -> u64 {
    let (w, h) = bundle.document().page_size.to_points();
    let pixels = (w * dpi as f64 / 72.0) * (h * dpi as f64 / 72.0);
    let per_page = match bundle.page_assets() {
        Ok(assets) => {
            let rasters: Vec<u64> = assets
                .iter()
                .filter_map(|a| a.file_with_extension("jpg"))
                .filter_map(|p| p.metadata().ok())
                .map(|m| m.len())
                .collect();
            if rasters.is_empty() {
                (pixels * 3.0 / 10.0) as u64
            } else {
                rasters.iter().sum::<u64>() / rasters.len() as u64
            }
        }
        Err(e) => {
            warn!(error = %e, "Could not list page assets for size estimate");
            (pixels * 3.0 / 10.0) as u64
        }
    };
    per_page * pages as u64 + 1024
}
