//! Rasterizer backed by pre-rendered page assets.

use super::{PageImage, Rasterizer, RenderError, RenderSettings, RenderedPage};
use nb_package::document::PAGES_DIR;
use nb_package::NotebookBundle;
use std::fs;
use tracing::trace;

/// Built-in rasterizer for headless use.
///
/// Uses `pages/<id>.jpg` (or `.jpeg`) when the application left a rendered
/// copy of the page; otherwise fills the page with the document background.
/// `annotations_only` always yields a white page.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetRasterizer;

impl AssetRasterizer {
    pub fn new() -> Self {
        AssetRasterizer
    }
}

impl Rasterizer for AssetRasterizer {
    fn render_page(
        &self,
        bundle: &NotebookBundle,
        page_index: usize,
        settings: &RenderSettings,
    ) -> Result<RenderedPage, RenderError> {
        let doc = bundle.document();
        let page = doc.pages.get(page_index).ok_or(RenderError::PageOutOfRange {
            page: page_index,
            count: doc.page_count(),
        })?;
        let (width_pt, height_pt) = doc.page_size.to_points();

        if settings.annotations_only {
            return Ok(RenderedPage {
                image: PageImage::Solid {
                    rgb: [255, 255, 255],
                },
                width_pt,
                height_pt,
            });
        }

        let pages_dir = bundle.root().join(PAGES_DIR);
        let raster = ["jpg", "jpeg", "JPG", "JPEG"]
            .iter()
            .map(|ext| pages_dir.join(format!("{}.{ext}", page.id)))
            .find(|p| p.is_file());

        let image = match raster {
            Some(path) => {
                let data = fs::read(&path)?;
                let (width, height, components) = jpeg_dimensions(&data).ok_or_else(|| {
                    RenderError::InvalidImage(format!("{} is not a baseline JPEG", path.display()))
                })?;
                trace!(page = page_index, width, height, "Using pre-rendered page");
                PageImage::Jpeg {
                    data,
                    width,
                    height,
                    components,
                }
            }
            None => PageImage::Solid {
                rgb: doc.background_rgb(),
            },
        };

        Ok(RenderedPage {
            image,
            width_pt,
            height_pt,
        })
    }
}

/// Width, height and component count from a JPEG's frame header.
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32, u8)> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            // fill byte
            pos += 1;
            continue;
        }
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }

        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if len < 2 {
            return None;
        }
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let seg = data.get(pos + 4..pos + 2 + len)?;
            if seg.len() < 6 {
                return None;
            }
            let height = u16::from_be_bytes([seg[1], seg[2]]) as u32;
            let width = u16::from_be_bytes([seg[3], seg[4]]) as u32;
            let components = seg[5];
            if width == 0 || height == 0 || !matches!(components, 1 | 3 | 4) {
                return None;
            }
            return Some((width, height, components));
        }
        pos += 2 + len;
    }
    None
}
