//! Page coordinate model.
//!
//! All annotation geometry is stored in document points: a scale-independent,
//! page-local space with the origin at the top-left corner of the page, x
//! growing right and y growing down (1 point = 1/72 inch). Only rendering and
//! pointer capture deal in pixels.
//!
//! The conversions here never clamp the scale. Callers clamp first, see
//! [`crate::config::AnnotatorConfig::clamp_scale`].

use serde::{Deserialize, Serialize};

/// A position in document points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DocPoint {
    pub x: f32,
    pub y: f32,
}

impl DocPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &DocPoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A position in on-screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in document points, `(x, y)` being the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DocRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl DocRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> DocPoint {
        DocPoint::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Zero-area rectangle, as stored for ink strokes whose shape lives in their points.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0.0 && self.height == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// Inclusive containment test.
    pub fn contains(&self, point: &DocPoint) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// Grow the rectangle by `amount` on every side.
    pub fn inflate(&self, amount: f32) -> DocRect {
        DocRect::new(
            self.x - amount,
            self.y - amount,
            self.width + 2.0 * amount,
            self.height + 2.0 * amount,
        )
    }

    pub fn union(&self, other: &DocRect) -> DocRect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        DocRect::new(x, y, self.right().max(other.right()) - x, self.bottom().max(other.bottom()) - y)
    }

    pub fn intersects(&self, other: &DocRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Bounding rectangle of a point set. `None` for an empty set.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a DocPoint>) -> Option<DocRect> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for point in iter {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }
        Some(DocRect::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    /// Distance from a point to the nearest edge, zero when inside.
    pub fn distance_to(&self, point: &DocPoint) -> f32 {
        let dx = (self.x - point.x).max(0.0).max(point.x - self.right());
        let dy = (self.y - point.y).max(0.0).max(point.y - self.bottom());
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// Convert a document point to page-local pixels at `scale`.
pub fn to_screen(point: DocPoint, scale: f32) -> ScreenPoint {
    ScreenPoint::new(point.x * scale, point.y * scale)
}

/// Convert a pixel position to document points.
///
/// `origin` is the pixel position of the page's top-left corner in the same
/// space as `pixel` (e.g. the page element's offset within the viewport).
pub fn to_document(pixel: ScreenPoint, scale: f32, origin: ScreenPoint) -> DocPoint {
    DocPoint::new((pixel.x - origin.x) / scale, (pixel.y - origin.y) / scale)
}

pub fn rect_to_screen(rect: DocRect, scale: f32) -> ScreenRect {
    ScreenRect::new(rect.x * scale, rect.y * scale, rect.width * scale, rect.height * scale)
}

pub fn rect_to_document(rect: ScreenRect, scale: f32, origin: ScreenPoint) -> DocRect {
    let top_left = to_document(ScreenPoint::new(rect.x, rect.y), scale, origin);
    DocRect::new(top_left.x, top_left.y, rect.width / scale, rect.height / scale)
}

/// Where a page sits on screen and at what zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub origin: ScreenPoint,
    pub scale: f32,
}

impl Viewport {
    pub fn new(origin: ScreenPoint, scale: f32) -> Self {
        Self { origin, scale }
    }

    /// Viewport with the page at the pixel origin.
    pub fn at_scale(scale: f32) -> Self {
        Self { origin: ScreenPoint::default(), scale }
    }

    /// Document point to viewport pixel (origin applied).
    pub fn to_client(&self, point: DocPoint) -> ScreenPoint {
        let local = to_screen(point, self.scale);
        ScreenPoint::new(local.x + self.origin.x, local.y + self.origin.y)
    }

    /// Viewport pixel to document point.
    pub fn to_document(&self, pixel: ScreenPoint) -> DocPoint {
        to_document(pixel, self.scale, self.origin)
    }
}

/// Flip a top-left-origin rectangle into a bottom-left-origin page space
/// (PDF user space) of the given height: `y' = page_height - y - height`.
///
/// The transform is its own inverse.
pub fn to_pdf_user_space(rect: DocRect, page_height: f32) -> DocRect {
    DocRect::new(rect.x, page_height - rect.y - rect.height, rect.width, rect.height)
}

/// Inverse of [`to_pdf_user_space`].
pub fn from_pdf_user_space(rect: DocRect, page_height: f32) -> DocRect {
    to_pdf_user_space(rect, page_height)
}

/// Flip a single point between top-left and bottom-left origin.
pub fn flip_point(point: DocPoint, page_height: f32) -> DocPoint {
    DocPoint::new(point.x, page_height - point.y)
}

/// Distance from `point` to the segment `start..end`.
pub fn distance_to_segment(point: &DocPoint, start: &DocPoint, end: &DocPoint) -> f32 {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length_sq = dx * dx + dy * dy;

    if length_sq < 1e-6 {
        return point.distance_to(start);
    }

    let t = (((point.x - start.x) * dx + (point.y - start.y) * dy) / length_sq).clamp(0.0, 1.0);
    let closest = DocPoint::new(start.x + t * dx, start.y + t * dy);
    point.distance_to(&closest)
}
