//! Burn compositor.
//!
//! Draws every unburned highlight and ink stroke into its page's content
//! stream and re-embeds the whole annotation set in `/Keywords`. Notes are
//! embedded but never drawn. The operation is all-or-nothing: everything is
//! validated before the document is touched, and any failure returns an
//! error instead of bytes.

use crate::metadata::{read_keywords, write_keywords};
use crate::{is_encrypted, page_size, resolve_inherited};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use pagemark_core::annotation::{Annotation, AnnotationBody, ModelError, Stroke};
use pagemark_core::coords::{flip_point, to_pdf_user_space};
use pagemark_core::embedded::{encode_embedded, replace_payload};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum BurnError {
    #[error("PDF parse error: {0}")]
    Parse(String),
    #[error("encrypted PDFs are not supported")]
    Encrypted,
    #[error("annotation on page {page} but document has {page_count} pages")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("invalid annotation: {0}")]
    InvalidAnnotation(#[from] ModelError),
    #[error("failed to encode annotation metadata: {0}")]
    Encode(String),
    #[error("failed to write document: {0}")]
    Write(String),
    #[error("burn failed: {0}")]
    Failed(String),
    #[error("burn worker stopped unexpectedly")]
    WorkerGone,
}

/// Burn `annotations` into `source`, returning new document bytes.
pub fn burn_annotations(source: &[u8], annotations: &[Annotation]) -> Result<Vec<u8>, BurnError> {
    if is_encrypted(source) {
        return Err(BurnError::Encrypted);
    }
    let mut doc = Document::load_mem(source).map_err(|e| BurnError::Parse(e.to_string()))?;
    let pages = doc.get_pages();
    let page_count = pages.len() as u32;

    // Validate everything before mutating anything.
    for annotation in annotations {
        if annotation.page < 1 || annotation.page > page_count {
            return Err(BurnError::PageOutOfRange { page: annotation.page, page_count });
        }
        if annotation.is_burnable() {
            annotation.validate(page_count)?;
        }
    }

    let mut by_page: BTreeMap<u32, Vec<&Annotation>> = BTreeMap::new();
    for annotation in annotations.iter().filter(|a| a.is_burnable()) {
        by_page.entry(annotation.page).or_default().push(annotation);
    }

    info!(pages = by_page.len(), annotations = annotations.len(), "burn started");

    for (page, page_annotations) in &by_page {
        let page_id = *pages
            .get(page)
            .ok_or(BurnError::PageOutOfRange { page: *page, page_count })?;
        composite_page(&mut doc, page_id, page_annotations).map_err(|err| {
            error!(page, error = %err, "failed to composite page");
            err
        })?;
    }

    let payload = encode_embedded(annotations).map_err(|e| BurnError::Encode(e.to_string()))?;
    let keywords = replace_payload(read_keywords(&doc).as_deref(), &payload);
    write_keywords(&mut doc, &keywords).map_err(|e| BurnError::Write(e.to_string()))?;

    let mut output = Vec::new();
    doc.save_to(&mut output).map_err(|e| BurnError::Write(e.to_string()))?;
    info!(bytes = output.len(), "burn finished");
    Ok(output)
}

/// Graphics-state resources keyed by opacity.
#[derive(Debug, Default)]
struct OpacityStates {
    names: Vec<(u32, String)>,
}

impl OpacityStates {
    /// Resource name for `opacity`, registering it on first use.
    fn name_for(&mut self, opacity: f32) -> String {
        let key = (opacity.clamp(0.0, 1.0) * 1000.0).round() as u32;
        if let Some((_, name)) = self.names.iter().find(|(k, _)| *k == key) {
            return name.clone();
        }
        let name = format!("PMgs{}", self.names.len());
        self.names.push((key, name.clone()));
        name
    }

    fn into_dictionary(self) -> Dictionary {
        let mut dict = Dictionary::new();
        for (key, name) in self.names {
            let alpha = key as f32 / 1000.0;
            dict.set(
                name,
                dictionary! {
                    "Type" => "ExtGState",
                    "CA" => Object::Real(alpha),
                    "ca" => Object::Real(alpha),
                },
            );
        }
        dict
    }
}

fn real(value: f32) -> Object {
    Object::Real(value)
}

fn color_operands(style: &Stroke) -> Vec<Object> {
    let (r, g, b) = style.color.to_normalized();
    vec![real(r), real(g), real(b)]
}

/// Content operations drawing `annotations` on a page of `page_height`.
fn overlay_operations(
    annotations: &[&Annotation],
    page_height: f32,
    states: &mut OpacityStates,
) -> Vec<Operation> {
    let mut ops = Vec::new();

    for annotation in annotations {
        match &annotation.body {
            AnnotationBody::Highlight { style, .. } => {
                let rect = to_pdf_user_space(annotation.bbox, page_height);
                let gs = states.name_for(style.opacity);
                ops.extend([
                    Operation::new("q", vec![]),
                    Operation::new("gs", vec![Object::Name(gs.into_bytes())]),
                    Operation::new("rg", color_operands(style)),
                    Operation::new(
                        "re",
                        vec![real(rect.x), real(rect.y), real(rect.width), real(rect.height)],
                    ),
                    Operation::new("f", vec![]),
                    Operation::new("Q", vec![]),
                ]);
            }
            AnnotationBody::Ink { points, style } => {
                let gs = states.name_for(style.opacity);
                ops.extend([
                    Operation::new("q", vec![]),
                    Operation::new("gs", vec![Object::Name(gs.into_bytes())]),
                    Operation::new("RG", color_operands(style)),
                    Operation::new("w", vec![real(style.stroke_width)]),
                    Operation::new("J", vec![Object::Integer(1)]),
                    Operation::new("j", vec![Object::Integer(1)]),
                ]);
                for (index, point) in points.iter().enumerate() {
                    let flipped = flip_point(*point, page_height);
                    let op = if index == 0 { "m" } else { "l" };
                    ops.push(Operation::new(op, vec![real(flipped.x), real(flipped.y)]));
                }
                ops.extend([Operation::new("S", vec![]), Operation::new("Q", vec![])]);
            }
            AnnotationBody::Note { .. } => {}
        }
    }

    ops
}

fn encode(operations: Vec<Operation>) -> Result<Vec<u8>, BurnError> {
    Content { operations }.encode().map_err(|e| BurnError::Write(e.to_string()))
}

fn composite_page(
    doc: &mut Document,
    page_id: ObjectId,
    annotations: &[&Annotation],
) -> Result<(), BurnError> {
    let page_height = page_size(doc, page_id).height;
    let mut states = OpacityStates::default();

    let mut overlay = vec![Operation::new("Q", vec![]), Operation::new("q", vec![])];
    overlay.extend(overlay_operations(annotations, page_height, &mut states));
    overlay.push(Operation::new("Q", vec![]));

    let open_id = doc.add_object(Stream::new(Dictionary::new(), encode(vec![Operation::new("q", vec![])])?));
    let overlay_id = doc.add_object(Stream::new(Dictionary::new(), encode(overlay)?));

    let mut resources = page_resources(doc, page_id);
    merge_ext_gstates(doc, &mut resources, states.into_dictionary());

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| BurnError::Parse(format!("page dictionary: {e}")))?;

    let mut contents = vec![Object::Reference(open_id)];
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => contents.push(Object::Reference(*id)),
        Ok(Object::Array(existing)) => contents.extend(existing.iter().cloned()),
        Ok(_) => return Err(BurnError::Parse("/Contents is not a reference or array".to_string())),
        Err(_) => {}
    }
    contents.push(Object::Reference(overlay_id));

    page.set("Contents", Object::Array(contents));
    page.set("Resources", Object::Dictionary(resources));

    debug!(?page_id, annotations = annotations.len(), "page composited");
    Ok(())
}

/// A private copy of the page's effective resources, resolved through
/// references and page-tree inheritance.
fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    resolve_inherited(doc, page_id, b"Resources")
        .and_then(|obj| obj.as_dict().ok())
        .cloned()
        .unwrap_or_default()
}

fn merge_ext_gstates(doc: &Document, resources: &mut Dictionary, added: Dictionary) {
    if added.is_empty() {
        return;
    }
    let mut states = match resources.get(b"ExtGState") {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_default(),
        _ => Dictionary::new(),
    };
    for (name, state) in added.iter() {
        states.set(name.clone(), state.clone());
    }
    resources.set("ExtGState", Object::Dictionary(states));
}
