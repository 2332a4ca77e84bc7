//! Batch export and import.
//!
//! Three entry points share one loop ([`engine`]): [`export_pdf_batch`],
//! [`export_package_batch`] and [`import_package_batch`]. Each takes a
//! resolved path list, an options struct, a progress hook and a
//! cancellation token, and returns a [`BatchResult`].

pub mod engine;
pub mod import;
pub mod output_path;
pub mod package;
pub mod pdf;

pub use engine::{
    display_name, no_progress, BatchError, BatchOutcome, BatchProgress, BatchResult, ErrorKind,
    FailFast, FileError, FileOutcome, FileResult, FileStatus, Operation, CANCELLED_MESSAGE,
    STOPPED_MESSAGE,
};
pub use import::{import_package_batch, ImportOptions};
pub use output_path::{generate_output_path, is_single_file_output, OutputTarget};
pub use package::{export_package_batch, ExportPackageOptions};
pub use pdf::{export_pdf_batch, ExportPdfOptions, PDF_EXTENSION};
