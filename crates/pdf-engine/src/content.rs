//! Native text listing from page content streams.
//!
//! A lightweight interpreter over the text operators. Glyph widths are not
//! read from font programs; a run's advance is estimated from its character
//! count and font size.

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use pagemark_core::engine::{EngineError, TextItem};

/// Estimated advance per character, as a fraction of the font size.
const ESTIMATED_ADVANCE: f32 = 0.5;

/// TJ adjustments more negative than this (thousandths of an em) read as a
/// word gap.
const TJ_SPACE_THRESHOLD: f32 = -250.0;

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// `a × b` for PDF row-vector matrices.
fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
        a[4] * b[0] + a[5] * b[2] + b[4],
        a[4] * b[1] + a[5] * b[3] + b[5],
    ]
}

fn translate(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

#[derive(Debug, Clone)]
struct TextState {
    ctm: Matrix,
    saved: Vec<Matrix>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    font_size: f32,
    leading: f32,
    horizontal_scale: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            ctm: IDENTITY,
            saved: Vec::new(),
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            font_size: 0.0,
            leading: 0.0,
            horizontal_scale: 1.0,
        }
    }
}

impl TextState {
    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = multiply(&translate(tx, ty), &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    /// Emit an item for `text` at the current position and advance past it.
    fn show(&mut self, text: String, items: &mut Vec<TextItem>) {
        let char_count = text.chars().count() as f32;
        let advance = char_count * ESTIMATED_ADVANCE * self.font_size * self.horizontal_scale;

        let font = [self.font_size * self.horizontal_scale, 0.0, 0.0, self.font_size, 0.0, 0.0];
        let user = multiply(&multiply(&font, &self.text_matrix), &self.ctm);
        let run = multiply(&multiply(&translate(advance, 0.0), &self.text_matrix), &self.ctm);
        let origin = multiply(&self.text_matrix, &self.ctm);

        let width = (run[4] - origin[4]).hypot(run[5] - origin[5]);
        let height = user[2].hypot(user[3]);

        if !text.trim().is_empty() {
            items.push(TextItem { text, transform: user, width, height });
        }
        self.text_matrix = multiply(&translate(advance, 0.0), &self.text_matrix);
    }
}

fn number(operands: &[Object], index: usize) -> Option<f32> {
    operands.get(index)?.as_float().ok()
}

fn matrix(operands: &[Object]) -> Option<Matrix> {
    let mut out = [0.0; 6];
    for (slot, value) in out.iter_mut().enumerate() {
        *value = number(operands, slot)?;
    }
    Some(out)
}

/// Decode a PDF string operand. UTF-16BE with a BOM, else UTF-8, else Latin-1.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn string_operand(operand: Option<&Object>) -> Option<String> {
    match operand? {
        Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
        _ => None,
    }
}

/// List the text items of one page, in content order.
pub fn extract_text_items(doc: &Document, page_id: ObjectId) -> Result<Vec<TextItem>, EngineError> {
    let bytes = doc
        .get_page_content(page_id)
        .map_err(|e| EngineError::Parse(format!("failed to read page content: {e}")))?;
    text_items_from_content(&bytes)
}

/// List text items from raw content stream bytes.
pub fn text_items_from_content(bytes: &[u8]) -> Result<Vec<TextItem>, EngineError> {
    let content = Content::decode(bytes)
        .map_err(|e| EngineError::Parse(format!("failed to decode content stream: {e}")))?;

    let mut state = TextState::default();
    let mut items = Vec::new();

    for operation in &content.operations {
        let operands = operation.operands.as_slice();
        match operation.operator.as_str() {
            "q" => state.saved.push(state.ctm),
            "Q" => {
                if let Some(ctm) = state.saved.pop() {
                    state.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(m) = matrix(operands) {
                    state.ctm = multiply(&m, &state.ctm);
                }
            }
            "BT" => {
                state.text_matrix = IDENTITY;
                state.line_matrix = IDENTITY;
            }
            "Tf" => {
                if let Some(size) = number(operands, 1) {
                    state.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = number(operands, 0) {
                    state.leading = leading;
                }
            }
            "Tz" => {
                if let Some(scale) = number(operands, 0) {
                    state.horizontal_scale = scale / 100.0;
                }
            }
            "Td" => {
                if let (Some(tx), Some(ty)) = (number(operands, 0), number(operands, 1)) {
                    state.move_line(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (number(operands, 0), number(operands, 1)) {
                    state.leading = -ty;
                    state.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = matrix(operands) {
                    state.text_matrix = m;
                    state.line_matrix = m;
                }
            }
            "T*" => {
                let leading = state.leading;
                state.move_line(0.0, -leading);
            }
            "Tj" => {
                if let Some(text) = string_operand(operands.first()) {
                    state.show(text, &mut items);
                }
            }
            "'" => {
                let leading = state.leading;
                state.move_line(0.0, -leading);
                if let Some(text) = string_operand(operands.first()) {
                    state.show(text, &mut items);
                }
            }
            "\"" => {
                let leading = state.leading;
                state.move_line(0.0, -leading);
                if let Some(text) = string_operand(operands.get(2)) {
                    state.show(text, &mut items);
                }
            }
            "TJ" => {
                let Some(Object::Array(parts)) = operands.first() else { continue };
                let mut text = String::new();
                for part in parts {
                    match part {
                        Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
                        other => {
                            let adjust = other.as_float().unwrap_or(0.0);
                            if adjust < TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                                text.push(' ');
                            }
                        }
                    }
                }
                state.show(text, &mut items);
            }
            _ => {}
        }
    }

    Ok(items)
}
