//! Batch import of `.snbx` packages into bundle directories.

use super::engine::{run_batch, BatchError, BatchProgress, BatchResult, FileError, FileOutcome, Operation};
use crate::cancel::CancellationToken;
use nb_package::{ExtractOutcome, ImportPlan, OverwritePolicy, PackageReader, PACKAGE_EXTENSION};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Options for [`import_package_batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Directory receiving the restored bundles. Defaults to
    /// `<data dir>/notebooks`.
    pub destination: Option<PathBuf>,
    pub overwrite_policy: OverwritePolicy,
    pub dry_run: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            destination: None,
            overwrite_policy: OverwritePolicy::Rename,
            dry_run: false,
        }
    }
}

impl ImportOptions {
    pub fn destination_or_default(&self) -> PathBuf {
        self.destination.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("nb-batch")
                .join("notebooks")
        })
    }
}

/// Import each package in `packages`, in order.
pub fn import_package_batch(
    packages: &[PathBuf],
    options: &ImportOptions,
    progress: &mut dyn BatchProgress,
    cancel: &CancellationToken,
) -> Result<BatchResult, BatchError> {
    if packages.is_empty() {
        return Ok(BatchResult::empty(Operation::Import, options.dry_run));
    }

    let dest = options.destination_or_default();
    if !options.dry_run && !dest.is_dir() {
        debug!(path = %dest.display(), "Creating import destination");
        fs::create_dir_all(&dest).map_err(|source| BatchError::OutputDirectory {
            path: dest.clone(),
            source,
        })?;
    }

    Ok(run_batch(
        Operation::Import,
        packages,
        options.dry_run,
        progress,
        cancel,
        |package| import_one(package, &dest, options),
    ))
}

/// Package file name without its `.snbx` suffix.
fn package_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!(".{PACKAGE_EXTENSION}");
    if name.len() > suffix.len() && name.to_ascii_lowercase().ends_with(&suffix) {
        name[..name.len() - suffix.len()].to_string()
    } else {
        name
    }
}

fn import_one(
    package: &Path,
    dest: &Path,
    options: &ImportOptions,
) -> Result<FileOutcome, FileError> {
    let mut reader = PackageReader::open(package)?;
    let fallback = package_stem(package);
    let pages = Some(reader.manifest().document.page_count());

    if options.dry_run {
        let output = match reader.plan_import(dest, &fallback, options.overwrite_policy)? {
            ImportPlan::Skip(existing) => return Ok(skipped_existing(&existing)),
            ImportPlan::Create(path) | ImportPlan::Replace(path) => path,
        };
        return Ok(FileOutcome::Done {
            output,
            bytes: reader.manifest().total_bytes(),
            pages,
            note: None,
        });
    }

    match reader.extract_bundle(dest, &fallback, options.overwrite_policy)? {
        ExtractOutcome::Imported {
            bundle_path,
            bytes,
            pdf_path,
        } => Ok(FileOutcome::Done {
            output: bundle_path,
            bytes,
            pages,
            note: pdf_path.map(|p| format!("PDF restored to {}", p.display())),
        }),
        ExtractOutcome::Skipped { existing } => Ok(skipped_existing(&existing)),
    }
}

fn skipped_existing(existing: &Path) -> FileOutcome {
    let name = existing
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| existing.display().to_string());
    FileOutcome::Skipped {
        reason: format!("notebook already exists: {name}"),
    }
}
