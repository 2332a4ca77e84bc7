//! Output location rules shared by the export operations.

use super::engine::BatchError;
use nb_package::{bundle_stem, has_extension};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a batch writes its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// One input written to exactly this path.
    SingleFile(PathBuf),
    /// Each input written to `<dir>/<stem>.<ext>`.
    Directory(PathBuf),
}

impl OutputTarget {
    /// Decide single-file vs directory mode.
    ///
    /// Single-file mode applies only with exactly one input and an output
    /// path that carries `extension` and is not an existing directory.
    pub fn resolve(output: &Path, input_count: usize, extension: &str) -> Self {
        if is_single_file_output(output, input_count, extension) {
            OutputTarget::SingleFile(output.to_path_buf())
        } else {
            OutputTarget::Directory(output.to_path_buf())
        }
    }

    /// Final artifact path for `input`.
    pub fn path_for(&self, input: &Path, extension: &str) -> PathBuf {
        match self {
            OutputTarget::SingleFile(path) => path.clone(),
            OutputTarget::Directory(dir) => generate_output_path(input, dir, extension),
        }
    }

    /// Directory that must exist before writing.
    pub fn directory(&self) -> Option<&Path> {
        match self {
            OutputTarget::SingleFile(path) => path.parent().filter(|p| !p.as_os_str().is_empty()),
            OutputTarget::Directory(dir) => Some(dir),
        }
    }

    /// Create the output directory unless this is a dry run.
    pub fn prepare(&self, dry_run: bool) -> Result<(), BatchError> {
        let Some(dir) = self.directory() else {
            return Ok(());
        };
        if dry_run || dir.is_dir() {
            return Ok(());
        }
        debug!(path = %dir.display(), "Creating output directory");
        fs::create_dir_all(dir).map_err(|source| BatchError::OutputDirectory {
            path: dir.to_path_buf(),
            source,
        })
    }
}

/// True when `output` names a single artifact rather than a directory.
pub fn is_single_file_output(output: &Path, input_count: usize, extension: &str) -> bool {
    input_count == 1 && has_extension(output, extension) && !output.is_dir()
}

/// `<output_dir>/<stem of input>.<extension>`.
///
/// Bundle and package suffixes are stripped from the input name.
pub fn generate_output_path(input: &Path, output_dir: &Path, extension: &str) -> PathBuf {
    let stem = bundle_stem(input);
    output_dir.join(format!("{stem}.{extension}"))
}
