//! Annotation data model
//!
//! Highlights, sticky notes and free-hand ink, all stored in document points
//! (see [`crate::coords`]). The set of kinds is closed: every consumer
//! (renderer, burner, eraser) matches on [`AnnotationBody`] exhaustively.

use crate::coords::{distance_to_segment, DocPoint, DocRect};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for an annotation.
///
/// Assigned by the store on first persist (UUID v4 text). Identifiers read
/// back from embedded metadata keep whatever text they were written with.
pub type AnnotationId = String;

/// Identifier of the document an annotation belongs to.
pub type DocumentId = String;

/// Default size of a note marker, in points.
pub const NOTE_MARKER_SIZE: f32 = 24.0;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("invalid color {0:?}, expected #rrggbb")]
    InvalidColor(String),
    #[error("ink annotation needs at least 2 points, got {0}")]
    InkTooShort(usize),
    #[error("non-finite coordinate in annotation geometry")]
    NonFiniteGeometry,
}

/// Annotation kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Note,
    Ink,
}

impl AnnotationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationKind::Highlight => "highlight",
            AnnotationKind::Note => "note",
            AnnotationKind::Ink => "ink",
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque RGB color. Opacity is carried separately in [`Stroke`].
///
/// Serializes as a `#rrggbb` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert to normalized values (0.0 to 1.0)
    pub fn to_normalized(&self) -> (f32, f32, f32) {
        (self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0)
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Parse `#rrggbb` or `rrggbb` (also accepts the `#rgb` shorthand).
    pub fn from_hex(value: &str) -> Result<Self, ModelError> {
        let invalid = || ModelError::InvalidColor(value.to_string());
        let hex = value.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());

        match hex.len() {
            6 => Ok(Color::rgb(channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?)),
            3 => {
                let expand = |s: &str| channel(s).map(|v| v * 17);
                Ok(Color::rgb(expand(&hex[0..1])?, expand(&hex[1..2])?, expand(&hex[2..3])?))
            }
            _ => Err(invalid()),
        }
    }
}

impl Color {
    pub const YELLOW: Color = Color::rgb(255, 235, 59);
    pub const RED: Color = Color::rgb(229, 57, 53);
    pub const BLUE: Color = Color::rgb(30, 136, 229);
    pub const GREEN: Color = Color::rgb(67, 160, 71);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Color::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Rendering attributes shared by highlights and ink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    pub color: Color,
    /// 0.0 (transparent) to 1.0 (opaque)
    pub opacity: f32,
    /// Line width in points. Unused by highlights.
    pub stroke_width: f32,
}

impl Stroke {
    pub fn new(color: Color, opacity: f32, stroke_width: f32) -> Self {
        Self { color, opacity: opacity.clamp(0.0, 1.0), stroke_width: stroke_width.max(0.0) }
    }

    pub fn highlight() -> Self {
        Self::new(Color::YELLOW, 0.4, 0.0)
    }

    pub fn ink() -> Self {
        Self::new(Color::RED, 1.0, 2.0)
    }
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationBody {
    /// Text highlight. `text` is the selected text, used to match the
    /// highlight against its burned copy later.
    Highlight { text: String, style: Stroke },
    /// Sticky note with user-authored text. Never rendered into page content.
    Note { text: String, style: Option<Stroke> },
    /// Free-hand polyline.
    Ink { points: Vec<DocPoint>, style: Stroke },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// `None` until first persisted.
    pub id: Option<AnnotationId>,
    /// 1-based page number.
    pub page: u32,
    pub bbox: DocRect,
    pub body: AnnotationBody,
    /// Unix milliseconds. UX only, never used for identity.
    pub created_at: i64,
    /// Read projection of embedded metadata; immutable except for notes.
    pub burned: bool,
}

impl Annotation {
    pub fn highlight(page: u32, bbox: DocRect, text: impl Into<String>, style: Stroke) -> Self {
        Self::from_body(page, bbox, AnnotationBody::Highlight { text: text.into(), style })
    }

    /// A note anchored at `at`, drawn as a fixed-size marker.
    pub fn note(page: u32, at: DocPoint, text: impl Into<String>) -> Self {
        let bbox = DocRect::new(at.x, at.y, NOTE_MARKER_SIZE, NOTE_MARKER_SIZE);
        Self::from_body(page, bbox, AnnotationBody::Note { text: text.into(), style: None })
    }

    /// An ink stroke. The bbox is derived from the points.
    pub fn ink(page: u32, points: Vec<DocPoint>, style: Stroke) -> Self {
        let bbox = DocRect::from_points(&points).unwrap_or_default();
        Self::from_body(page, bbox, AnnotationBody::Ink { points, style })
    }

    fn from_body(page: u32, bbox: DocRect, body: AnnotationBody) -> Self {
        Self { id: None, page, bbox, body, created_at: now_millis(), burned: false }
    }

    pub fn with_id(mut self, id: impl Into<AnnotationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn kind(&self) -> AnnotationKind {
        match self.body {
            AnnotationBody::Highlight { .. } => AnnotationKind::Highlight,
            AnnotationBody::Note { .. } => AnnotationKind::Note,
            AnnotationBody::Ink { .. } => AnnotationKind::Ink,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Highlighted or authored text, if the kind carries any.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            AnnotationBody::Highlight { text, .. } | AnnotationBody::Note { text, .. } => {
                Some(text.as_str())
            }
            AnnotationBody::Ink { .. } => None,
        }
    }

    /// Text with surrounding whitespace removed; empty when the kind has none.
    pub fn trimmed_text(&self) -> &str {
        self.text().map(str::trim).unwrap_or("")
    }

    pub fn points(&self) -> &[DocPoint] {
        match &self.body {
            AnnotationBody::Ink { points, .. } => points,
            _ => &[],
        }
    }

    pub fn style(&self) -> Option<&Stroke> {
        match &self.body {
            AnnotationBody::Highlight { style, .. } | AnnotationBody::Ink { style, .. } => {
                Some(style)
            }
            AnnotationBody::Note { style, .. } => style.as_ref(),
        }
    }

    /// Bounding box used for matching and hit-testing.
    ///
    /// Ink may be stored with a zero bbox; its extent then comes from the points.
    pub fn effective_bbox(&self) -> DocRect {
        match &self.body {
            AnnotationBody::Ink { points, .. } if self.bbox.is_degenerate() => {
                DocRect::from_points(points).unwrap_or(self.bbox)
            }
            _ => self.bbox,
        }
    }

    /// Whether the eraser may remove this annotation.
    pub fn is_erasable(&self) -> bool {
        !self.burned || self.kind() == AnnotationKind::Note
    }

    /// Whether the annotation is drawn into page content on burn.
    pub fn is_burnable(&self) -> bool {
        !self.burned && self.kind() != AnnotationKind::Note
    }

    /// Check if a point hits this annotation.
    pub fn hit_test(&self, point: &DocPoint, tolerance: f32) -> bool {
        match &self.body {
            AnnotationBody::Highlight { .. } | AnnotationBody::Note { .. } => {
                self.bbox.inflate(tolerance).contains(point)
            }
            AnnotationBody::Ink { points, style } => {
                let reach = tolerance + style.stroke_width / 2.0;
                match points.as_slice() {
                    [] => false,
                    [only] => only.distance_to(point) <= reach,
                    _ => points
                        .windows(2)
                        .any(|pair| distance_to_segment(point, &pair[0], &pair[1]) <= reach),
                }
            }
        }
    }

    /// Check structural invariants against the owning document.
    pub fn validate(&self, page_count: u32) -> Result<(), ModelError> {
        if self.page < 1 || self.page > page_count {
            return Err(ModelError::PageOutOfRange { page: self.page, page_count });
        }
        if !self.bbox.is_finite() || self.points().iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFiniteGeometry);
        }
        if let AnnotationBody::Ink { points, .. } = &self.body {
            if points.len() < 2 {
                return Err(ModelError::InkTooShort(points.len()));
            }
        }
        Ok(())
    }
}

/// Current time as unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke_points() -> Vec<DocPoint> {
        vec![DocPoint::new(10.0, 10.0), DocPoint::new(50.0, 10.0), DocPoint::new(50.0, 40.0)]
    }

    #[test]
    fn test_color_hex_round_trip() {
        let color = Color::from_hex("#1e88e5").unwrap();
        assert_eq!(color, Color::rgb(0x1e, 0x88, 0xe5));
        assert_eq!(color.to_hex(), "#1e88e5");
        assert_eq!(Color::from_hex("fff").unwrap(), Color::rgb(255, 255, 255));
    }

    #[test]
    fn test_color_rejects_garbage() {
        assert!(Color::from_hex("#12345").is_err());
        assert!(Color::from_hex("#zzzzzz").is_err());
        assert!(Color::from_hex("#ééé").is_err());
    }

    #[test]
    fn test_color_normalized() {
        let (r, g, b) = Color::rgb(255, 0, 51).to_normalized();
        assert_eq!((r, g, b), (1.0, 0.0, 0.2));
    }

    #[test]
    fn test_stroke_clamps_opacity() {
        let stroke = Stroke::new(Color::BLACK, 1.7, -3.0);
        assert_eq!(stroke.opacity, 1.0);
        assert_eq!(stroke.stroke_width, 0.0);
    }

    #[test]
    fn test_ink_bbox_from_points() {
        let ink = Annotation::ink(1, stroke_points(), Stroke::ink());
        assert_eq!(ink.bbox, DocRect::new(10.0, 10.0, 40.0, 30.0));
        assert_eq!(ink.kind(), AnnotationKind::Ink);
        assert!(ink.text().is_none());
    }

    #[test]
    fn test_effective_bbox_for_degenerate_ink() {
        let mut ink = Annotation::ink(1, stroke_points(), Stroke::ink());
        ink.bbox = DocRect::default();
        assert_eq!(ink.effective_bbox(), DocRect::new(10.0, 10.0, 40.0, 30.0));
    }

    #[test]
    fn test_highlight_hit_test() {
        let highlight = Annotation::highlight(
            1,
            DocRect::new(100.0, 100.0, 50.0, 12.0),
            "selected words",
            Stroke::highlight(),
        );
        assert!(highlight.hit_test(&DocPoint::new(120.0, 105.0), 0.0));
        assert!(highlight.hit_test(&DocPoint::new(98.0, 105.0), 3.0));
        assert!(!highlight.hit_test(&DocPoint::new(90.0, 105.0), 3.0));
    }

    #[test]
    fn test_ink_hit_test_follows_polyline() {
        let ink = Annotation::ink(1, stroke_points(), Stroke::ink());
        assert!(ink.hit_test(&DocPoint::new(30.0, 11.0), 1.0));
        assert!(ink.hit_test(&DocPoint::new(51.0, 25.0), 1.0));
        // Inside the bbox but far from the stroke.
        assert!(!ink.hit_test(&DocPoint::new(20.0, 35.0), 1.0));
    }

    #[test]
    fn test_burned_records_are_not_erasable_except_notes() {
        let mut highlight =
            Annotation::highlight(1, DocRect::new(0.0, 0.0, 10.0, 10.0), "x", Stroke::highlight());
        highlight.burned = true;
        assert!(!highlight.is_erasable());
        assert!(!highlight.is_burnable());

        let mut note = Annotation::note(1, DocPoint::new(5.0, 5.0), "remember");
        note.burned = true;
        assert!(note.is_erasable());
        assert!(!note.is_burnable());
    }

    #[test]
    fn test_validate_page_range() {
        let note = Annotation::note(3, DocPoint::new(5.0, 5.0), "p3");
        assert!(note.validate(3).is_ok());
        assert_eq!(
            note.validate(2),
            Err(ModelError::PageOutOfRange { page: 3, page_count: 2 })
        );

        let zero = Annotation::note(0, DocPoint::new(5.0, 5.0), "p0");
        assert!(zero.validate(3).is_err());
    }

    #[test]
    fn test_validate_rejects_short_ink() {
        let ink = Annotation::ink(1, vec![DocPoint::new(1.0, 1.0)], Stroke::ink());
        assert_eq!(ink.validate(1), Err(ModelError::InkTooShort(1)));
    }

    #[test]
    fn test_trimmed_text() {
        let note = Annotation::note(1, DocPoint::new(0.0, 0.0), "  hello \n");
        assert_eq!(note.trimmed_text(), "hello");

        let ink = Annotation::ink(1, stroke_points(), Stroke::ink());
        assert_eq!(ink.trimmed_text(), "");
    }
}
