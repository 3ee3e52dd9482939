//! Flat JSON record form of an annotation.
//!
//! Used both by the embedded metadata payload and by the file store. Field
//! names are camelCase, kind-specific attributes are optional, and `burned`
//! is never written: it is implied by where a record was read from.

use crate::annotation::{Annotation, AnnotationBody, AnnotationKind, Color, ModelError, Stroke};
use crate::coords::{DocPoint, DocRect};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    #[serde(default, deserialize_with = "deserialize_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub page: u32,
    pub kind: AnnotationKind,
    #[serde(default)]
    pub bbox: DocRect,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<DocPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f32>,
    #[serde(default)]
    pub created_at: i64,
}

/// Ids were numeric in older payloads; accept both and keep them as text.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    }))
}

impl AnnotationRecord {
    fn stroke_or(&self, fallback: Stroke) -> Stroke {
        Stroke::new(
            self.color.unwrap_or(fallback.color),
            self.opacity.unwrap_or(fallback.opacity),
            self.stroke_width.unwrap_or(fallback.stroke_width),
        )
    }

    fn explicit_stroke(&self) -> Option<Stroke> {
        if self.color.is_none() && self.opacity.is_none() && self.stroke_width.is_none() {
            None
        } else {
            Some(self.stroke_or(Stroke::new(Color::YELLOW, 1.0, 0.0)))
        }
    }

    /// Convert into the domain model with the given burned flag.
    pub fn into_annotation(self, burned: bool) -> Result<Annotation, ModelError> {
        if self.page == 0 {
            return Err(ModelError::PageOutOfRange { page: 0, page_count: 0 });
        }
        if !self.bbox.is_finite() || self.points.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFiniteGeometry);
        }

        let body = match self.kind {
            AnnotationKind::Highlight => AnnotationBody::Highlight {
                text: self.text.clone().unwrap_or_default(),
                style: self.stroke_or(Stroke::highlight()),
            },
            AnnotationKind::Note => AnnotationBody::Note {
                text: self.text.clone().unwrap_or_default(),
                style: self.explicit_stroke(),
            },
            AnnotationKind::Ink => AnnotationBody::Ink {
                points: self.points.clone(),
                style: self.stroke_or(Stroke::ink()),
            },
        };

        Ok(Annotation {
            id: self.id,
            page: self.page,
            bbox: self.bbox,
            body,
            created_at: self.created_at,
            burned,
        })
    }
}

impl From<&Annotation> for AnnotationRecord {
    fn from(annotation: &Annotation) -> Self {
        let style = annotation.style().copied();
        let (points, text) = match &annotation.body {
            AnnotationBody::Highlight { text, .. } | AnnotationBody::Note { text, .. } => {
                (Vec::new(), Some(text.clone()))
            }
            AnnotationBody::Ink { points, .. } => (points.clone(), None),
        };

        Self {
            id: annotation.id.clone(),
            page: annotation.page,
            kind: annotation.kind(),
            bbox: annotation.bbox,
            points,
            text,
            color: style.map(|s| s.color),
            opacity: style.map(|s| s.opacity),
            stroke_width: style.map(|s| s.stroke_width),
            created_at: annotation.created_at,
        }
    }
}
