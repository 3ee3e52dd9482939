//! Document engine collaborator interface.
//!
//! The annotation pipeline consumes a document engine only through this
//! trait: page geometry, a raster of a page at a scale, the page's native
//! text-content listing, and the free-text metadata field the embedded
//! annotation payload lives in.

use pagemark_scheduler::CancellationToken;

/// Page size in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// Pixel size of a page at a given scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

/// RGBA8 page raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Raster {
    /// A blank white raster.
    pub fn blank(width: u32, height: u32) -> Self {
        Self { width, height, pixels: vec![255; width as usize * height as usize * 4] }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize * 4
    }
}

/// One positioned item of native page text.
///
/// `transform` is the text-space to PDF user-space matrix `[a, b, c, d, e, f]`
/// (bottom-left origin); `width` and `height` are in user-space points.
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub text: String,
    pub transform: [f32; 6],
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    /// Cooperative cancellation. Not a failure.
    #[error("render cancelled")]
    Cancelled,
    #[error("document parse error: {0}")]
    Parse(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Read-only view of an opened document. Pages are 1-based.
pub trait DocumentEngine: Send + Sync {
    fn page_count(&self) -> u32;

    fn page_size(&self, page: u32) -> Result<PageSize, EngineError>;

    fn viewport(&self, page: u32, scale: f32) -> Result<ViewportSize, EngineError> {
        let size = self.page_size(page)?;
        Ok(ViewportSize {
            width: (size.width * scale).round().max(1.0) as u32,
            height: (size.height * scale).round().max(1.0) as u32,
        })
    }

    /// Rasterize a page. Returns [`EngineError::Cancelled`] if `token` fires.
    fn render(&self, page: u32, scale: f32, token: &CancellationToken)
        -> Result<Raster, EngineError>;

    fn text_content(&self, page: u32) -> Result<Vec<TextItem>, EngineError>;

    /// The metadata field carrying embedded annotations, if present.
    fn metadata_keywords(&self) -> Option<String>;
}

pub fn check_page(page: u32, page_count: u32) -> Result<(), EngineError> {
    if page < 1 || page > page_count {
        return Err(EngineError::PageOutOfRange { page, page_count });
    }
    Ok(())
}
