//! Embedded annotation payload.
//!
//! Burned annotations travel inside the document itself: a free-text
//! metadata field holds the sentinel [`SENTINEL`] immediately followed by a
//! JSON array of [`AnnotationRecord`]s. Reading never fails: a missing
//! sentinel, malformed JSON or a non-array payload all yield an empty set.

use crate::annotation::{Annotation, AnnotationKind};
use crate::record::AnnotationRecord;
use serde_json::Value;
use tracing::{debug, warn};

/// Marker locating the private payload inside the metadata field.
pub const SENTINEL: &str = "PDF_ANNOTATOR_DATA:::";

/// Parse the embedded annotation set out of a metadata field.
///
/// Every record comes back `burned = true`, except notes, which stay live
/// overlays after a burn. Records that fail to convert are skipped.
pub fn decode_embedded(field: Option<&str>) -> Vec<Annotation> {
    let Some(field) = field else {
        return Vec::new();
    };
    let Some(start) = field.find(SENTINEL) else {
        debug!("metadata field has no annotation sentinel");
        return Vec::new();
    };
    let payload = &field[start + SENTINEL.len()..];

    let mut values = serde_json::Deserializer::from_str(payload).into_iter::<Value>();
    let items = match values.next() {
        Some(Ok(Value::Array(items))) => items,
        Some(Ok(other)) => {
            warn!(kind = value_kind(&other), "embedded annotation payload is not an array");
            return Vec::new();
        }
        Some(Err(err)) => {
            warn!(error = %err, "embedded annotation payload is malformed");
            return Vec::new();
        }
        None => {
            warn!("embedded annotation payload is empty");
            return Vec::new();
        }
    };

    let mut annotations = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let record = match serde_json::from_value::<AnnotationRecord>(item) {
            Ok(record) => record,
            Err(err) => {
                warn!(index, error = %err, "skipping unreadable embedded record");
                continue;
            }
        };
        let burned = record.kind != AnnotationKind::Note;
        match record.into_annotation(burned) {
            Ok(annotation) => annotations.push(annotation),
            Err(err) => warn!(index, error = %err, "skipping invalid embedded record"),
        }
    }

    debug!(count = annotations.len(), "decoded embedded annotations");
    annotations
}

/// Serialize a full annotation set as sentinel + JSON array.
pub fn encode_embedded(annotations: &[Annotation]) -> Result<String, serde_json::Error> {
    let records: Vec<AnnotationRecord> = annotations.iter().map(AnnotationRecord::from).collect();
    Ok(format!("{SENTINEL}{}", serde_json::to_string(&records)?))
}

/// Replace the payload in an existing metadata field, keeping any text the
/// field carried before the sentinel.
pub fn replace_payload(existing: Option<&str>, payload: &str) -> String {
    let prefix = existing
        .map(|field| match field.find(SENTINEL) {
            Some(start) => &field[..start],
            None => field,
        })
        .map(str::trim_end)
        .unwrap_or("");

    if prefix.is_empty() {
        payload.to_string()
    } else {
        format!("{prefix} {payload}")
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
