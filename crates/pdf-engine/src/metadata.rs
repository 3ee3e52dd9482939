//! Info dictionary `/Keywords` access.

use crate::content::decode_pdf_string;
use lopdf::{Dictionary, Document, Object, StringFormat};

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// The document's `/Keywords` text, if any.
pub fn read_keywords(doc: &Document) -> Option<String> {
    let value = info_dictionary(doc)?.get(b"Keywords").ok()?;
    let value = match value {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    match value {
        Object::String(bytes, _) => Some(decode_pdf_string(bytes)),
        _ => None,
    }
}

/// Encode text as a PDF text string: plain bytes when ASCII, UTF-16BE with a
/// byte order mark otherwise.
pub fn encode_pdf_text(text: &str) -> Vec<u8> {
    if text.is_ascii() {
        return text.as_bytes().to_vec();
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    bytes
}

/// Set `/Keywords`, creating the Info dictionary if the document has none.
pub fn write_keywords(doc: &mut Document, keywords: &str) -> Result<(), lopdf::Error> {
    // Hex keeps UTF-16 bytes clear of literal-string end-of-line rules.
    let format = if keywords.is_ascii() { StringFormat::Literal } else { StringFormat::Hexadecimal };
    let value = Object::String(encode_pdf_text(keywords), format);

    let info_id = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    };

    match info_id {
        Some(id) => {
            doc.get_dictionary_mut(id)?.set("Keywords", value);
        }
        None => {
            let mut info = match doc.trailer.get(b"Info") {
                Ok(Object::Dictionary(dict)) => dict.clone(),
                _ => Dictionary::new(),
            };
            info.set("Keywords", value);
            let id = doc.add_object(info);
            doc.trailer.set("Info", Object::Reference(id));
        }
    }
    Ok(())
}
