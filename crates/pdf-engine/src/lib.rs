//! lopdf-backed document engine.
//!
//! Implements the core [`DocumentEngine`] trait over a parsed PDF, plus the
//! burn compositor that writes annotations into page content and metadata,
//! the background burn worker, and a Tesseract OCR backend.

pub mod burn;
pub mod content;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod metadata;
pub mod tesseract;
pub mod worker;

use image::{ImageBuffer, Rgba};
use lopdf::{Document, Object, ObjectId};
use pagemark_core::engine::{check_page, DocumentEngine, EngineError, PageSize, Raster, TextItem};
use pagemark_scheduler::CancellationToken;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

pub use burn::{burn_annotations, BurnError};
pub use tesseract::TesseractOcr;
pub use worker::{BurnRequest, BurnResponse, BurnWorker};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// US Letter, used when a page has no readable MediaBox.
pub const DEFAULT_PAGE_SIZE: PageSize = PageSize { width: 612.0, height: 792.0 };

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("encrypted PDFs are not supported")]
    EncryptedUnsupported,
    #[error("document has no pages")]
    NoPages,
}

#[derive(Debug, Clone)]
struct PageRecord {
    size: PageSize,
    /// Native text listing, or the reason it could not be read.
    text: Result<Vec<TextItem>, String>,
}

/// An opened PDF.
///
/// Page geometry, text listings and metadata are read once at open; the
/// source bytes are kept for burning.
#[derive(Debug, Clone)]
pub struct LopdfEngine {
    bytes: Vec<u8>,
    pages: Vec<PageRecord>,
    keywords: Option<String>,
}

impl LopdfEngine {
    pub fn open_bytes(bytes: Vec<u8>) -> Result<Self, PdfEngineError> {
        if is_encrypted(&bytes) {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(&bytes)?;
        let mut pages = Vec::new();
        for (number, page_id) in doc.get_pages() {
            let size = page_size(&doc, page_id);
            let text = content::extract_text_items(&doc, page_id).map_err(|err| {
                warn!(page = number, error = %err, "failed to read page text");
                err.to_string()
            });
            pages.push(PageRecord { size, text });
        }
        if pages.is_empty() {
            return Err(PdfEngineError::NoPages);
        }

        let keywords = metadata::read_keywords(&doc);
        debug!(pages = pages.len(), has_keywords = keywords.is_some(), "document opened");
        Ok(Self { bytes, pages, keywords })
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, PdfEngineError> {
        Self::open_bytes(fs::read(path)?)
    }

    /// The bytes the document was opened from.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn page(&self, page: u32) -> Result<&PageRecord, EngineError> {
        check_page(page, self.page_count())?;
        Ok(&self.pages[page as usize - 1])
    }
}

impl DocumentEngine for LopdfEngine {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_size(&self, page: u32) -> Result<PageSize, EngineError> {
        Ok(self.page(page)?.size)
    }

    /// Placeholder raster: a white page with a light border.
    fn render(
        &self,
        page: u32,
        scale: f32,
        token: &CancellationToken,
    ) -> Result<Raster, EngineError> {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let scale = if scale <= 0.0 || !scale.is_finite() { 1.0 } else { scale };
        let size = self.viewport(page, scale)?;
        let (width, height) = (size.width, size.height);

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, Rgba([220, 220, 220, 255]));
                image.put_pixel(x, height - 1, Rgba([220, 220, 220, 255]));
            }
            for y in 0..height {
                image.put_pixel(0, y, Rgba([220, 220, 220, 255]));
                image.put_pixel(width - 1, y, Rgba([220, 220, 220, 255]));
            }
        }

        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(Raster { width, height, pixels: image.into_raw() })
    }

    fn text_content(&self, page: u32) -> Result<Vec<TextItem>, EngineError> {
        self.page(page)?.text.clone().map_err(EngineError::Parse)
    }

    fn metadata_keywords(&self) -> Option<String> {
        self.keywords.clone()
    }
}

pub(crate) fn is_encrypted(bytes: &[u8]) -> bool {
    bytes.windows(b"/Encrypt".len()).any(|window| window == b"/Encrypt")
}

/// Look up a page attribute, walking up the page tree via `/Parent`.
pub(crate) fn resolve_inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = page_id;
    // Bounded walk; a malformed tree could loop.
    for _ in 0..64 {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(value) = dict.get(key) {
            return match value {
                Object::Reference(id) => doc.get_object(*id).ok(),
                other => Some(other),
            };
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

/// Page size from the (possibly inherited) MediaBox.
pub(crate) fn page_size(doc: &Document, page_id: ObjectId) -> PageSize {
    resolve_inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| obj.as_array().ok())
        .and_then(|array| {
            if array.len() != 4 {
                return None;
            }
            let x0 = array[0].as_float().ok()?;
            let y0 = array[1].as_float().ok()?;
            let x1 = array[2].as_float().ok()?;
            let y1 = array[3].as_float().ok()?;
            Some(PageSize { width: (x1 - x0).abs(), height: (y1 - y0).abs() })
        })
        .unwrap_or(DEFAULT_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::SamplePdf;

    #[test]
    fn test_opens_pdf_and_reads_page_count() {
        let engine = LopdfEngine::open_bytes(SamplePdf::new().pages(3).build()).unwrap();
        assert_eq!(engine.page_count(), 3);
        assert_eq!(engine.page_size(1).unwrap(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_inherited_media_box() {
        let bytes = SamplePdf::new().media_box_on_parent(400.0, 300.0).build();
        let engine = LopdfEngine::open_bytes(bytes).unwrap();
        assert_eq!(engine.page_size(1).unwrap(), PageSize { width: 400.0, height: 300.0 });
    }

    #[test]
    fn test_page_out_of_range() {
        let engine = LopdfEngine::open_bytes(SamplePdf::new().build()).unwrap();
        assert!(matches!(
            engine.page_size(2),
            Err(EngineError::PageOutOfRange { page: 2, page_count: 1 })
        ));
        assert!(matches!(engine.text_content(0), Err(EngineError::PageOutOfRange { .. })));
    }

    #[test]
    fn test_render_produces_valid_raster() {
        let engine = LopdfEngine::open_bytes(SamplePdf::new().build()).unwrap();
        let raster = engine.render(1, 0.5, &CancellationToken::new()).unwrap();

        assert_eq!((raster.width, raster.height), (306, 396));
        assert!(raster.is_valid());
    }

    #[test]
    fn test_render_honours_cancellation() {
        let engine = LopdfEngine::open_bytes(SamplePdf::new().build()).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        assert!(matches!(engine.render(1, 1.0, &token), Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_text_content_lists_lines() {
        let bytes = SamplePdf::new().text_line("Hello annotator", 72.0, 700.0, 12.0).build();
        let engine = LopdfEngine::open_bytes(bytes).unwrap();

        let items = engine.text_content(1).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "Hello annotator");
        assert_eq!(items[0].transform[4], 72.0);
        assert_eq!(items[0].transform[5], 700.0);
    }

    #[test]
    fn test_keywords_are_exposed() {
        let bytes = SamplePdf::new().keywords("draft, internal").build();
        let engine = LopdfEngine::open_bytes(bytes).unwrap();
        assert_eq!(engine.metadata_keywords().as_deref(), Some("draft, internal"));
    }

    #[test]
    fn test_rejects_garbage_and_encrypted() {
        assert!(matches!(
            LopdfEngine::open_bytes(b"not a pdf".to_vec()),
            Err(PdfEngineError::Parse(_))
        ));
        assert!(matches!(
            LopdfEngine::open_bytes(b"%PDF-1.7 /Encrypt".to_vec()),
            Err(PdfEngineError::EncryptedUnsupported)
        ));
    }
}
