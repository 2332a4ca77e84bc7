//! Notebook batch export/import engine.
//!
//! This library provides:
//! - Input discovery for bundles and packages
//! - The batch engine (PDF export, package export, package import)
//! - A background job queue for interactive hosts
//! - Configuration, logging, exit codes and CLI output helpers
//!
//! The binary entry point is in `main.rs`.

pub mod batch;
pub mod cancel;
pub mod config;
pub mod discovery;
pub mod events;
pub mod exit_codes;
pub mod logging;
pub mod output;
pub mod queue;
pub mod render;

pub use batch::{
    export_package_batch, export_pdf_batch, import_package_batch, BatchError, BatchOutcome,
    BatchProgress, BatchResult, ExportPackageOptions, ExportPdfOptions, FileResult, FileStatus,
    ImportOptions,
};
pub use cancel::CancellationToken;
pub use discovery::{expand_input_paths, expand_package_paths, DiscoveryOptions};
pub use queue::{ExportJob, JobQueue, QueueConfig, QueueEvent};
pub use render::{AssetRasterizer, Rasterizer};
