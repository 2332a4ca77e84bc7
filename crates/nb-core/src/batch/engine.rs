//! Shared per-file loop and result types for batch operations.
//!
//! Every batch entry point runs the same shape: poll the cancellation token,
//! announce the file, run the single-file operation, record a [`FileResult`].
//! A failure is confined to its own file; only [`BatchError`] aborts a batch.

use crate::cancel::CancellationToken;
use crate::render::RenderError;
use nb_package::PackageError;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Message recorded for files not started because of cancellation.
pub const CANCELLED_MESSAGE: &str = "cancelled";
/// Message recorded for files not started because a progress hook stopped the batch.
pub const STOPPED_MESSAGE: &str = "stopped";

/// Which batch operation produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    ExportPdf,
    ExportPackage,
    Import,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::ExportPdf => write!(f, "export-pdf"),
            Operation::ExportPackage => write!(f, "export-package"),
            Operation::Import => write!(f, "import"),
        }
    }
}

/// Per-file status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Success,
    Skipped,
    Failed,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Success => write!(f, "success"),
            FileStatus::Skipped => write!(f, "skipped"),
            FileStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Failure taxonomy for a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Discovery,
    Validation,
    Render,
    Io,
    Integrity,
    Cancelled,
}

/// Error confined to one file of a batch.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("{0}")]
    Discovery(String),

    #[error("{0}")]
    Validation(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("{0}")]
    Io(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("cancelled")]
    Cancelled,
}

impl FileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FileError::Discovery(_) => ErrorKind::Discovery,
            FileError::Validation(_) => ErrorKind::Validation,
            FileError::Render(_) => ErrorKind::Render,
            FileError::Io(_) => ErrorKind::Io,
            FileError::Integrity(_) => ErrorKind::Integrity,
            FileError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<PackageError> for FileError {
    fn from(err: PackageError) -> Self {
        if err.is_integrity() {
            FileError::Integrity(err.to_string())
        } else if err.is_validation() {
            FileError::Validation(err.to_string())
        } else {
            FileError::Io(err.to_string())
        }
    }
}

impl From<RenderError> for FileError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Io(e) => FileError::Io(e.to_string()),
            other => FileError::Render(other.to_string()),
        }
    }
}

impl From<std::io::Error> for FileError {
    fn from(err: std::io::Error) -> Self {
        FileError::Io(err.to_string())
    }
}

/// Conditions that abort a whole batch before any file is processed.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("cannot create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

/// Outcome of one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pub input_path: PathBuf,
    pub status: FileStatus,
    /// Error text, skip reason, or a note on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Bytes written, or the estimate in a dry run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl FileResult {
    fn base(input: &Path, status: FileStatus, elapsed: Duration) -> Self {
        Self {
            input_path: input.to_path_buf(),
            status,
            message: String::new(),
            elapsed_ms: elapsed.as_millis() as u64,
            output_path: None,
            output_bytes: None,
            pages: None,
            error_kind: None,
        }
    }

    pub fn failed(input: &Path, err: &FileError, elapsed: Duration) -> Self {
        Self {
            message: err.to_string(),
            error_kind: Some(err.kind()),
            ..Self::base(input, FileStatus::Failed, elapsed)
        }
    }

    pub fn skipped(input: &Path, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            message: reason.into(),
            ..Self::base(input, FileStatus::Skipped, elapsed)
        }
    }

    /// Not started because the token was set.
    pub fn cancelled(input: &Path) -> Self {
        Self {
            message: CANCELLED_MESSAGE.to_string(),
            error_kind: Some(ErrorKind::Cancelled),
            ..Self::base(input, FileStatus::Skipped, Duration::ZERO)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_kind == Some(ErrorKind::Cancelled)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Name shown in progress output.
    pub fn display_name(&self) -> String {
        display_name(&self.input_path)
    }
}

/// What a single-file operation reports back to the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Done {
        output: PathBuf,
        bytes: u64,
        pages: Option<usize>,
        note: Option<String>,
    },
    Skipped {
        reason: String,
    },
}

impl FileOutcome {
    fn into_result(self, input: &Path, elapsed: Duration) -> FileResult {
        match self {
            FileOutcome::Done {
                output,
                bytes,
                pages,
                note,
            } => FileResult {
                message: note.unwrap_or_default(),
                output_path: Some(output),
                output_bytes: Some(bytes),
                pages,
                ..FileResult::base(input, FileStatus::Success, elapsed)
            },
            FileOutcome::Skipped { reason } => FileResult::skipped(input, reason, elapsed),
        }
    }
}

/// Aggregate classification of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// No inputs.
    Empty,
    /// Nothing failed.
    Success,
    /// Some inputs failed, at least one succeeded or was skipped.
    PartialFailure,
    /// Every input failed.
    TotalFailure,
    /// The cancellation token was observed.
    Cancelled,
}

/// Ordered per-file results plus derived counts. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub operation: Operation,
    pub results: Vec<FileResult>,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Subset of `skipped` not started because of cancellation.
    pub cancelled_count: usize,
    pub total_output_bytes: u64,
    pub elapsed_ms: u64,
    pub cancelled: bool,
    pub dry_run: bool,
    pub outcome: BatchOutcome,
}

impl BatchResult {
    pub fn new(
        operation: Operation,
        results: Vec<FileResult>,
        elapsed: Duration,
        cancelled: bool,
        dry_run: bool,
    ) -> Self {
        let count = |s: FileStatus| results.iter().filter(|r| r.status == s).count();
        let succeeded = count(FileStatus::Success);
        let skipped = count(FileStatus::Skipped);
        let failed = count(FileStatus::Failed);
        let cancelled_count = results.iter().filter(|r| r.is_cancelled()).count();
        let total_output_bytes = results
            .iter()
            .filter(|r| r.status == FileStatus::Success)
            .filter_map(|r| r.output_bytes)
            .sum();

        let outcome = if cancelled {
            BatchOutcome::Cancelled
        } else if results.is_empty() {
            BatchOutcome::Empty
        } else if failed == 0 {
            BatchOutcome::Success
        } else if succeeded == 0 && skipped == 0 {
            BatchOutcome::TotalFailure
        } else {
            BatchOutcome::PartialFailure
        };

        Self {
            operation,
            results,
            succeeded,
            skipped,
            failed,
            cancelled_count,
            total_output_bytes,
            elapsed_ms: elapsed.as_millis() as u64,
            cancelled,
            dry_run,
            outcome,
        }
    }

    /// Result for an empty input list.
    pub fn empty(operation: Operation, dry_run: bool) -> Self {
        Self::new(operation, Vec::new(), Duration::ZERO, false, dry_run)
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }
}

/// Progress hook invoked synchronously by the batch loop.
///
/// Closures `FnMut(&str, usize, usize)` implement it for the common case.
pub trait BatchProgress {
    /// Called before work on a file starts; `index` is 1-based.
    fn file_started(&mut self, name: &str, index: usize, total: usize);

    /// Called after each file. `Break` stops the batch; remaining files are
    /// recorded as skipped.
    fn file_finished(&mut self, index: usize, total: usize, result: &FileResult) -> ControlFlow<()> {
        let _ = (index, total, result);
        ControlFlow::Continue(())
    }
}

impl<F: FnMut(&str, usize, usize)> BatchProgress for F {
    fn file_started(&mut self, name: &str, index: usize, total: usize) {
        self(name, index, total)
    }
}

/// Wraps another hook and stops the batch at the first failed file.
pub struct FailFast<'a>(pub &'a mut dyn BatchProgress);

impl BatchProgress for FailFast<'_> {
    fn file_started(&mut self, name: &str, index: usize, total: usize) {
        self.0.file_started(name, index, total);
    }

    fn file_finished(&mut self, index: usize, total: usize, result: &FileResult) -> ControlFlow<()> {
        let flow = self.0.file_finished(index, total, result);
        if result.status == FileStatus::Failed {
            ControlFlow::Break(())
        } else {
            flow
        }
    }
}

/// Progress hook that ignores everything.
pub fn no_progress() -> impl BatchProgress {
    |_: &str, _: usize, _: usize| {}
}

/// File or directory name used in progress output.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Run `per_file` over `inputs` in order, isolating failures.
pub(crate) fn run_batch<F>(
    operation: Operation,
    inputs: &[PathBuf],
    dry_run: bool,
    progress: &mut dyn BatchProgress,
    cancel: &CancellationToken,
    mut per_file: F,
) -> BatchResult
where
    F: FnMut(&Path) -> Result<FileOutcome, FileError>,
{
    let started = Instant::now();
    let total = inputs.len();
    let mut results = Vec::with_capacity(total);
    let mut cancelled = false;

    info!(%operation, total, dry_run, "Batch started");

    for (i, input) in inputs.iter().enumerate() {
        if cancel.is_cancelled() {
            cancelled = true;
            info!(%operation, remaining = total - i, "Batch cancelled");
            results.extend(inputs[i..].iter().map(|p| FileResult::cancelled(p)));
            break;
        }

        let index = i + 1;
        let name = display_name(input);
        progress.file_started(&name, index, total);

        let file_started = Instant::now();
        let result = match per_file(input) {
            Ok(outcome) => outcome.into_result(input, file_started.elapsed()),
            Err(err) => {
                warn!(path = %input.display(), index, total, error = %err, "File failed");
                FileResult::failed(input, &err, file_started.elapsed())
            }
        };
        debug!(
            path = %input.display(),
            index,
            total,
            status = %result.status,
            elapsed_ms = result.elapsed_ms,
            "File finished"
        );

        let flow = progress.file_finished(index, total, &result);
        results.push(result);
        if flow.is_break() {
            info!(%operation, remaining = total - index, "Batch stopped by progress hook");
            results.extend(
                inputs[index..]
                    .iter()
                    .map(|p| FileResult::skipped(p, STOPPED_MESSAGE, Duration::ZERO)),
            );
            break;
        }
    }

    let result = BatchResult::new(operation, results, started.elapsed(), cancelled, dry_run);
    info!(
        %operation,
        succeeded = result.succeeded,
        skipped = result.skipped,
        failed = result.failed,
        cancelled = result.cancelled,
        elapsed_ms = result.elapsed_ms,
        "Batch complete"
    );
    result
}
