//! Synthetic PDF documents for tests and demos.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ResourcePlacement {
    #[default]
    Inline,
    Referenced,
    OnParent,
}

#[derive(Debug, Clone)]
struct Line {
    page: u32,
    text: String,
    x: f32,
    y: f32,
    size: f32,
}

/// Builder for a small, valid PDF.
#[derive(Debug, Clone)]
pub struct SamplePdf {
    page_count: u32,
    lines: Vec<Line>,
    keywords: Option<String>,
    parent_media_box: Option<(f32, f32)>,
    resources: ResourcePlacement,
}

impl Default for SamplePdf {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplePdf {
    pub fn new() -> Self {
        Self {
            page_count: 1,
            lines: Vec::new(),
            keywords: None,
            parent_media_box: None,
            resources: ResourcePlacement::Inline,
        }
    }

    pub fn pages(mut self, count: u32) -> Self {
        self.page_count = count.max(1);
        self
    }

    /// A line of Helvetica text on page 1, baseline at `(x, y)` in PDF user space.
    pub fn text_line(self, text: &str, x: f32, y: f32, size: f32) -> Self {
        self.page_text_line(1, text, x, y, size)
    }

    pub fn page_text_line(mut self, page: u32, text: &str, x: f32, y: f32, size: f32) -> Self {
        self.lines.push(Line { page, text: text.to_string(), x, y, size });
        self
    }

    /// `count` lines of body text down the left side of `page`.
    pub fn body_text(mut self, page: u32, count: usize) -> Self {
        for index in 0..count {
            let y = 720.0 - index as f32 * 16.0;
            self = self.page_text_line(page, &format!("Sample line {} of body text", index + 1), 72.0, y, 12.0);
        }
        self
    }

    pub fn keywords(mut self, keywords: &str) -> Self {
        self.keywords = Some(keywords.to_string());
        self
    }

    /// Put the MediaBox on the page tree root instead of each page.
    pub fn media_box_on_parent(mut self, width: f32, height: f32) -> Self {
        self.parent_media_box = Some((width, height));
        self
    }

    /// Store page resources as a shared indirect object.
    pub fn referenced_resources(mut self) -> Self {
        self.resources = ResourcePlacement::Referenced;
        self
    }

    /// Put resources on the page tree root, inherited by every page.
    pub fn inherited_resources(mut self) -> Self {
        self.resources = ResourcePlacement::OnParent;
        self
    }

    pub fn try_build(&self) -> Result<Vec<u8>, lopdf::Error> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources = dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        };
        let shared_resources: Option<ObjectId> = match self.resources {
            ResourcePlacement::Referenced => Some(doc.add_object(resources.clone())),
            _ => None,
        };

        let mut page_ids = Vec::new();
        for page in 1..=self.page_count {
            let mut operations = Vec::new();
            for line in self.lines.iter().filter(|line| line.page == page) {
                operations.extend([
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Real(line.size)]),
                    Operation::new("Td", vec![Object::Real(line.x), Object::Real(line.y)]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(line.text.clone().into_bytes(), StringFormat::Literal)],
                    ),
                    Operation::new("ET", vec![]),
                ]);
            }
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));

            let mut page_dict = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            };
            if self.parent_media_box.is_none() {
                page_dict.set("MediaBox", media_box(612.0, 792.0));
            }
            match (self.resources, shared_resources) {
                (ResourcePlacement::Inline, _) => page_dict.set("Resources", resources.clone()),
                (ResourcePlacement::Referenced, Some(id)) => page_dict.set("Resources", id),
                _ => {}
            }
            page_ids.push(doc.add_object(page_dict));
        }

        let mut pages = dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => self.page_count as i64,
        };
        if let Some((width, height)) = self.parent_media_box {
            pages.set("MediaBox", media_box(width, height));
        }
        if self.resources == ResourcePlacement::OnParent {
            pages.set("Resources", resources);
        }
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        if let Some(keywords) = &self.keywords {
            let info_id = doc.add_object(dictionary! {
                "Keywords" => Object::String(keywords.clone().into_bytes(), StringFormat::Literal),
            });
            doc.trailer.set("Info", info_id);
        }

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)?;
        Ok(buffer)
    }

    /// Build the document; an empty buffer if serialization fails.
    pub fn build(&self) -> Vec<u8> {
        self.try_build().unwrap_or_else(|err| {
            warn!(error = %err, "failed to build sample PDF");
            Vec::new()
        })
    }
}

fn media_box(width: f32, height: f32) -> Object {
    Object::Array(vec![0.into(), 0.into(), Object::Real(width), Object::Real(height)])
}
