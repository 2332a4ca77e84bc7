//! PDF assembly on top of `lopdf`.
//!
//! Pages are added one at a time as they come out of the rasterizer; only
//! their encoded image and content streams are kept. The page tree, outline,
//! document info and trailer are built in [`PdfDocumentWriter::finish`],
//! which serializes the whole document into the caller's sink.

use super::{PageImage, RenderError, RenderedPage};
use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;

const PDF_VERSION: &str = "1.4";
const IMAGE_NAME: &str = "Im0";

/// Values for the `/Info` dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfMetadata {
    pub title: String,
    pub subject: Option<String>,
    pub creator: String,
    pub producer: String,
    pub created: DateTime<Utc>,
}

impl PdfMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subject: None,
            creator: "nb-batch".to_string(),
            producer: concat!("nb-core ", env!("CARGO_PKG_VERSION")).to_string(),
            created: Utc::now(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Builds a PDF page by page.
pub struct PdfDocumentWriter {
    doc: Document,
    pages_id: ObjectId,
    pages: Vec<ObjectId>,
}

impl Default for PdfDocumentWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfDocumentWriter {
    /// Start an empty document; the page tree id is reserved up front so
    /// pages can point at their parent.
    pub fn new() -> Self {
        let mut doc = Document::with_version(PDF_VERSION);
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            pages: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Append one page.
    pub fn add_page(&mut self, page: &RenderedPage) -> Result<(), RenderError> {
        let (w, h) = (page.width_pt, page.height_pt);
        if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
            return Err(RenderError::InvalidImage(format!(
                "invalid page size {w}x{h}"
            )));
        }

        let (operations, image) = match &page.image {
            PageImage::Solid { rgb } => {
                let [r, g, b] = rgb.map(|c| Object::Real(f32::from(c) / 255.0));
                let fill = vec![
                    Operation::new("rg", vec![r, g, b]),
                    Operation::new("re", vec![0.into(), 0.into(), real(w), real(h)]),
                    Operation::new("f", vec![]),
                ];
                (fill, None)
            }
            PageImage::Jpeg {
                data,
                width,
                height,
                components,
            } => {
                let color_space = match components {
                    1 => "DeviceGray",
                    4 => "DeviceCMYK",
                    _ => "DeviceRGB",
                };
                let mut dict = image_dict(*width, *height, color_space);
                dict.set("Filter", "DCTDecode");
                (draw_image(w, h), Some(Stream::new(dict, data.clone())))
            }
            PageImage::Rgb {
                data,
                width,
                height,
            } => {
                let expected = (*width as usize) * (*height as usize) * 3;
                if data.len() != expected || expected == 0 {
                    return Err(RenderError::InvalidImage(format!(
                        "RGB buffer has {} bytes, expected {expected}",
                        data.len()
                    )));
                }
                let dict = image_dict(*width, *height, "DeviceRGB");
                (draw_image(w, h), Some(Stream::new(dict, data.clone())))
            }
        };

        let mut resources = Dictionary::new();
        if let Some(stream) = image {
            let image_id = self.doc.add_object(stream);
            resources.set("XObject", dictionary! { IMAGE_NAME => image_id });
        }

        let content = Content { operations }.encode()?;
        let content_id = self.doc.add_object(Stream::new(Dictionary::new(), content));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), real(w), real(h)],
            "Resources" => resources,
            "Contents" => content_id,
        });
        self.pages.push(page_id);
        Ok(())
    }

    /// Add the page tree, optional outline and info, then write the file.
    ///
    /// `outline` holds one title per page, in page order.
    pub fn finish<W: Write>(
        mut self,
        out: &mut W,
        metadata: Option<&PdfMetadata>,
        outline: Option<&[String]>,
    ) -> Result<(), RenderError> {
        let kids: Vec<Object> = self.pages.iter().map(|&id| id.into()).collect();
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.pages.len() as i64,
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        };
        if let Some(titles) = outline.filter(|t| !t.is_empty() && !self.pages.is_empty()) {
            let outline_id = self.add_outline(titles);
            catalog.set("Outlines", outline_id);
            catalog.set("PageMode", "UseOutlines");
        }
        let catalog_id = self.doc.add_object(catalog);
        self.doc.trailer.set("Root", catalog_id);

        if let Some(meta) = metadata {
            let info_id = self.doc.add_object(info_dict(meta));
            self.doc.trailer.set("Info", info_id);
        }

        self.doc.save_to(out)?;
        out.flush()?;
        Ok(())
    }

    fn add_outline(&mut self, titles: &[String]) -> ObjectId {
        let root_id = self.doc.new_object_id();
        let count = titles.len().min(self.pages.len());
        let item_ids: Vec<ObjectId> = (0..count).map(|_| self.doc.new_object_id()).collect();

        for (i, &item_id) in item_ids.iter().enumerate() {
            let mut item = dictionary! {
                "Title" => text_string(&titles[i]),
                "Parent" => root_id,
                "Dest" => vec![self.pages[i].into(), "Fit".into()],
            };
            if i > 0 {
                item.set("Prev", item_ids[i - 1]);
            }
            if i + 1 < count {
                item.set("Next", item_ids[i + 1]);
            }
            self.doc.objects.insert(item_id, Object::Dictionary(item));
        }

        self.doc.objects.insert(
            root_id,
            Object::Dictionary(dictionary! {
                "Type" => "Outlines",
                "First" => item_ids[0],
                "Last" => item_ids[count - 1],
                "Count" => count as i64,
            }),
        );
        root_id
    }
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

fn image_dict(width: u32, height: u32, color_space: &str) -> Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(width),
        "Height" => i64::from(height),
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8,
    }
}

/// Scale the unit-square image over the whole page.
fn draw_image(w: f64, h: f64) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![real(w), 0.into(), 0.into(), real(h), 0.into(), 0.into()],
        ),
        Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ]
}

fn info_dict(meta: &PdfMetadata) -> Dictionary {
    let mut info = dictionary! {
        "Title" => text_string(&meta.title),
        "Creator" => text_string(&meta.creator),
        "Producer" => text_string(&meta.producer),
        "CreationDate" => Object::string_literal(
            meta.created.format("D:%Y%m%d%H%M%SZ").to_string(),
        ),
    };
    if let Some(subject) = &meta.subject {
        info.set("Subject", text_string(subject));
    }
    info
}

/// PDF text string: a literal for ASCII, UTF-16BE with a byte order mark
/// otherwise.
pub fn text_string(s: &str) -> Object {
    if s.is_ascii() {
        Object::string_literal(s)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        bytes.extend(s.encode_utf16().flat_map(u16::to_be_bytes));
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}
