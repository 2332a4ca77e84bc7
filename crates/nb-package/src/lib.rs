//! Notebook bundle model and portable package codec.
//!
//! A notebook lives on disk as a *bundle*: a `Name.snb` directory holding
//! `document.json` plus page assets. A *package* (`Name.snbx`) is the
//! shareable single-file form of a bundle.
//!
//! # Package Format
//!
//! Packages are ZIP archives containing:
//! - `manifest.json`: format version, document snapshot, page mapping,
//!   file listing with SHA-256 checksums
//! - `pdf/<file>`: embedded copy of the linked PDF (optional, stored)
//! - `pages/<notebook_id>/<index:04>.<ext>`: page assets
//! - `extras/<path>`: every other bundle file
//!
//! # Example
//!
//! ```no_run
//! use nb_package::{NotebookBundle, OverwritePolicy, PackageReader, PackageWriter};
//! use std::path::Path;
//!
//! // Package a bundle
//! let bundle = NotebookBundle::open(Path::new("Lecture.snb")).unwrap();
//! let writer = PackageWriter::from_bundle(&bundle, true).unwrap();
//! writer.write_atomic(Path::new("Lecture.snbx")).unwrap();
//!
//! // Restore it elsewhere
//! let mut reader = PackageReader::open(Path::new("Lecture.snbx")).unwrap();
//! reader
//!     .extract_bundle(Path::new("/tmp/notes"), "Lecture", OverwritePolicy::Rename)
//!     .unwrap();
//! ```

pub mod atomic;
pub mod document;
pub mod error;
pub mod manifest;
pub mod reader;
pub mod writer;

pub use atomic::{temp_path_for, AtomicFile};
pub use document::{
    bundle_stem, content_hash, has_extension, is_valid_bundle, LayoutMode, NotebookBundle,
    NotebookDocument, PageAssets, PageRef, PageSize, BUNDLE_EXTENSION, BUNDLE_FORMAT_VERSION,
    DOCUMENT_FILE_NAME, PACKAGE_EXTENSION,
};
pub use error::{PackageError, Result};
pub use manifest::{FileEntry, PackageManifest, PageEntry, PdfEntry, PACKAGE_VERSION};
pub use reader::{ExtractOutcome, ImportPlan, OverwritePolicy, PackageReader};
pub use writer::PackageWriter;
