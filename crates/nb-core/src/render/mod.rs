//! Page rasterization contract and PDF assembly.
//!
//! The engine never draws pages itself. A [`Rasterizer`] turns one page of a
//! bundle into a [`RenderedPage`]; [`pdf_writer::PdfDocumentWriter`] collects
//! those pages and writes the PDF file.

pub mod asset;
pub mod page_range;
pub mod pdf_writer;

pub use asset::AssetRasterizer;
pub use page_range::{parse_page_range, PageSelection};
pub use pdf_writer::{PdfDocumentWriter, PdfMetadata};

use nb_package::NotebookBundle;
use thiserror::Error;

/// Lowest accepted export resolution.
pub const MIN_DPI: u32 = 36;
/// Highest accepted export resolution.
pub const MAX_DPI: u32 = 1200;

/// Errors from rendering a page.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("page {page}: {reason}")]
    Page { page: usize, reason: String },

    #[error("invalid image data: {0}")]
    InvalidImage(String),

    #[error("PDF assembly failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-call rendering knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    pub dpi: u32,
    /// Render only the user's ink, without page backgrounds or PDF content.
    pub annotations_only: bool,
}

/// Pixel payload of a rendered page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageImage {
    /// Baseline JPEG, embedded as-is.
    Jpeg {
        data: Vec<u8>,
        width: u32,
        height: u32,
        /// 1 = gray, 3 = RGB, 4 = CMYK.
        components: u8,
    },
    /// Packed 8-bit RGB rows, `width * height * 3` bytes.
    Rgb {
        data: Vec<u8>,
        width: u32,
        height: u32,
    },
    /// Uniform fill.
    Solid { rgb: [u8; 3] },
}

/// One page ready for PDF assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub image: PageImage,
    /// Physical size in PDF points.
    pub width_pt: f64,
    pub height_pt: f64,
}

/// Turns bundle pages into pixels.
///
/// Called sequentially, once per selected page; implementations must be
/// shareable with the queue's worker thread.
pub trait Rasterizer: Send + Sync {
    fn render_page(
        &self,
        bundle: &NotebookBundle,
        page_index: usize,
        settings: &RenderSettings,
    ) -> Result<RenderedPage, RenderError>;
}

impl<T: Rasterizer + ?Sized> Rasterizer for std::sync::Arc<T> {
    fn render_page(
        &self,
        bundle: &NotebookBundle,
        page_index: usize,
        settings: &RenderSettings,
    ) -> Result<RenderedPage, RenderError> {
        (**self).render_page(bundle, page_index, settings)
    }
}
