//! Text layer synthesis
//!
//! Builds the invisible, selectable text overlay for a page. Native text from
//! the document engine is used when the page has enough of it; otherwise the
//! page is treated as image-only and OCR runs over its raster. Runs are kept
//! in document points and ordered for reading, optionally split into
//! detected columns so a selection never jumps across a gutter.

use crate::coords::{from_pdf_user_space, DocPoint, DocRect};
use crate::engine::{DocumentEngine, EngineError, TextItem};
use crate::ocr::{OcrEngine, OcrError, OcrWord};
use pagemark_scheduler::{RenderGate, RenderTicket};
use serde::Serialize;
use tracing::{debug, warn};

/// Rough advance of an average glyph relative to the font size.
const AVG_GLYPH_WIDTH: f32 = 0.5;

/// Fraction of the text span above which a run is treated as spanning
/// columns (headings, rules) and ignored when looking for gutters.
const SPANNING_RUN_RATIO: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSource {
    Native,
    Ocr,
}

/// A positioned piece of page text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRun {
    pub text: String,
    pub rect: DocRect,
    pub source: TextSource,
    /// Column index, 0 when column detection is off.
    pub column: usize,
    /// Line index within the page, in reading order.
    pub line: usize,
}

impl TextRun {
    pub fn new(text: impl Into<String>, rect: DocRect, source: TextSource) -> Self {
        Self { text: text.into(), rect, source, column: 0, line: 0 }
    }
}

/// Options for building a text layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayerOptions {
    /// A page "has text" when it carries more than this many native items.
    pub min_native_items: usize,
    pub column_detection: bool,
    /// Narrowest horizontal gap, in points, treated as a column gutter.
    pub min_column_gap: f32,
    /// Ratio between raster pixels and CSS pixels.
    pub device_pixel_ratio: f32,
}

impl Default for TextLayerOptions {
    fn default() -> Self {
        Self {
            min_native_items: 5,
            column_detection: false,
            min_column_gap: 18.0,
            device_pixel_ratio: 1.0,
        }
    }
}

impl TextLayerOptions {
    pub fn with_min_native_items(mut self, count: usize) -> Self {
        self.min_native_items = count;
        self
    }

    pub fn with_column_detection(mut self, enabled: bool) -> Self {
        self.column_detection = enabled;
        self
    }

    pub fn with_min_column_gap(mut self, gap: f32) -> Self {
        self.min_column_gap = gap;
        self
    }

    pub fn with_device_pixel_ratio(mut self, ratio: f32) -> Self {
        self.device_pixel_ratio = ratio;
        self
    }
}

/// Absolutely positioned, transparent span covering one run, in page-local pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlaySpan {
    pub text: String,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub font_size: f32,
    /// Horizontal stretch that makes the glyph run cover its source width.
    pub scale_x: f32,
}

/// The text layer of one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextLayer {
    page: u32,
    source: TextSource,
    runs: Vec<TextRun>,
    column_count: usize,
}

impl TextLayer {
    /// Order runs for reading, detecting columns first when enabled.
    pub fn new(page: u32, source: TextSource, mut runs: Vec<TextRun>, options: &TextLayerOptions) -> Self {
        let column_count = if options.column_detection {
            detect_columns(&mut runs, options.min_column_gap)
        } else {
            runs.iter_mut().for_each(|run| run.column = 0);
            usize::from(!runs.is_empty())
        };
        sort_reading_order(&mut runs);

        Self { page, source, runs, column_count }
    }

    /// Build from OCR words reported in raster pixels at `scale`.
    pub fn from_ocr(page: u32, words: &[OcrWord], scale: f32, options: &TextLayerOptions) -> Self {
        let runs = runs_from_ocr(words, scale, options.device_pixel_ratio);
        Self::new(page, TextSource::Ocr, runs, options)
    }

    pub fn empty(page: u32, source: TextSource) -> Self {
        Self { page, source, runs: Vec::new(), column_count: 0 }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn source(&self) -> TextSource {
        self.source
    }

    pub fn runs(&self) -> &[TextRun] {
        &self.runs
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Page text in reading order: words joined by spaces, lines by newlines,
    /// columns by blank lines.
    pub fn text(&self) -> String {
        let mut out = String::new();
        let mut previous: Option<&TextRun> = None;
        for run in &self.runs {
            if let Some(prev) = previous {
                if prev.column != run.column {
                    out.push_str("\n\n");
                } else if prev.line != run.line {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            out.push_str(run.text.trim());
            previous = Some(run);
        }
        out
    }

    /// Runs containing `query`.
    pub fn search(&self, query: &str, case_sensitive: bool) -> Vec<&TextRun> {
        if query.is_empty() {
            return Vec::new();
        }
        if case_sensitive {
            self.runs.iter().filter(|run| run.text.contains(query)).collect()
        } else {
            let needle = query.to_lowercase();
            self.runs.iter().filter(|run| run.text.to_lowercase().contains(&needle)).collect()
        }
    }

    fn nearest_run(&self, point: &DocPoint, column: Option<usize>) -> Option<usize> {
        self.runs
            .iter()
            .enumerate()
            .filter(|(_, run)| column.map_or(true, |c| run.column == c))
            .min_by(|(_, a), (_, b)| a.rect.distance_to(point).total_cmp(&b.rect.distance_to(point)))
            .map(|(index, _)| index)
    }

    /// Runs selected by dragging from `anchor` to `focus`.
    ///
    /// The selection is confined to the column the anchor falls in.
    pub fn select(&self, anchor: DocPoint, focus: DocPoint) -> Vec<&TextRun> {
        let Some(start) = self.nearest_run(&anchor, None) else {
            return Vec::new();
        };
        let column = self.runs[start].column;
        let end = self.nearest_run(&focus, Some(column)).unwrap_or(start);
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };

        self.runs[lo..=hi].iter().filter(|run| run.column == column).collect()
    }

    /// Transparent overlay spans at `scale`, covering each run's source glyphs.
    pub fn overlay(&self, scale: f32) -> Vec<OverlaySpan> {
        self.runs
            .iter()
            .map(|run| {
                let width = run.rect.width * scale;
                let height = run.rect.height * scale;
                let natural = run.text.chars().count() as f32 * height * AVG_GLYPH_WIDTH;
                let scale_x = if natural > 0.0 && width > 0.0 { width / natural } else { 1.0 };
                OverlaySpan {
                    text: run.text.clone(),
                    left: run.rect.x * scale,
                    top: run.rect.y * scale,
                    width,
                    height,
                    font_size: height,
                    scale_x,
                }
            })
            .collect()
    }
}

/// Number of non-blank native items.
pub fn count_native_items(items: &[TextItem]) -> usize {
    items.iter().filter(|item| !item.text.trim().is_empty()).count()
}

pub fn has_native_text(items: &[TextItem], min_native_items: usize) -> bool {
    count_native_items(items) > min_native_items
}

/// Convert native items (PDF user space) to runs in document points.
///
/// Returns `None` if the listing is malformed (non-finite geometry).
pub fn native_runs(items: &[TextItem], page_height: f32) -> Option<Vec<TextRun>> {
    let mut runs = Vec::with_capacity(items.len());
    for item in items {
        if item.text.trim().is_empty() {
            continue;
        }
        let finite = item.transform.iter().all(|v| v.is_finite())
            && item.width.is_finite()
            && item.height.is_finite();
        if !finite {
            return None;
        }

        let [_, _, c, d, e, f] = item.transform;
        let glyph_height = if item.height > 0.0 { item.height } else { c.hypot(d) };
        if glyph_height <= 0.0 {
            continue;
        }

        let user_space = DocRect::new(e, f, item.width.max(0.0), glyph_height);
        runs.push(TextRun::new(
            item.text.clone(),
            from_pdf_user_space(user_space, page_height),
            TextSource::Native,
        ));
    }
    Some(runs)
}

/// Convert OCR word boxes from raster pixels to document points.
///
/// The raster was produced at `scale * device_pixel_ratio` pixels per point.
pub fn runs_from_ocr(words: &[OcrWord], scale: f32, device_pixel_ratio: f32) -> Vec<TextRun> {
    let factor = scale * device_pixel_ratio;
    if !(factor.is_finite() && factor > 0.0) {
        return Vec::new();
    }

    words
        .iter()
        .filter(|word| !word.text.trim().is_empty())
        .map(|word| {
            let rect = DocRect::new(
                word.bbox.x / factor,
                word.bbox.y / factor,
                word.bbox.width / factor,
                word.bbox.height / factor,
            );
            TextRun::new(word.text.trim(), rect, TextSource::Ocr)
        })
        .collect()
}

/// Assign column indices from gutters in the horizontal projection of the runs.
///
/// Returns the number of columns found.
pub fn detect_columns(runs: &mut [TextRun], min_gap: f32) -> usize {
    if runs.is_empty() {
        return 0;
    }

    let left = runs.iter().map(|r| r.rect.x).fold(f32::INFINITY, f32::min);
    let right = runs.iter().map(|r| r.rect.right()).fold(f32::NEG_INFINITY, f32::max);
    let span = right - left;

    let mut extents: Vec<(f32, f32)> = runs
        .iter()
        .filter(|r| r.rect.width <= span * SPANNING_RUN_RATIO)
        .map(|r| (r.rect.x, r.rect.right()))
        .collect();
    if extents.is_empty() {
        runs.iter_mut().for_each(|run| run.column = 0);
        return 1;
    }
    extents.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut columns: Vec<(f32, f32)> = Vec::new();
    let mut current = extents[0];
    for &(start, end) in &extents[1..] {
        if start - current.1 < min_gap {
            current.1 = current.1.max(end);
        } else {
            columns.push(current);
            current = (start, end);
        }
    }
    columns.push(current);

    for run in runs.iter_mut() {
        let probe = if run.rect.width <= span * SPANNING_RUN_RATIO {
            run.rect.center().x
        } else {
            run.rect.x
        };
        run.column = columns.iter().rposition(|&(start, _)| start <= probe).unwrap_or(0);
    }

    debug!(columns = columns.len(), "detected text columns");
    columns.len()
}

/// Sort column-major, then by line, then left to right, assigning line indices.
fn sort_reading_order(runs: &mut Vec<TextRun>) {
    runs.sort_by(|a, b| {
        a.column
            .cmp(&b.column)
            .then(a.rect.y.total_cmp(&b.rect.y))
            .then(a.rect.x.total_cmp(&b.rect.x))
    });

    let mut ordered = Vec::with_capacity(runs.len());
    let mut line: Vec<TextRun> = Vec::new();
    let mut line_index = 0;

    for run in runs.drain(..) {
        let continues_line = line.first().map_or(true, |first| {
            first.column == run.column
                && (run.rect.center().y - first.rect.center().y).abs()
                    <= first.rect.height.max(run.rect.height) / 2.0
        });
        if !continues_line {
            flush_line(&mut line, &mut ordered, line_index);
            line_index += 1;
        }
        line.push(run);
    }
    flush_line(&mut line, &mut ordered, line_index);

    *runs = ordered;
}

fn flush_line(line: &mut Vec<TextRun>, ordered: &mut Vec<TextRun>, index: usize) {
    line.sort_by(|a, b| a.rect.x.total_cmp(&b.rect.x));
    for mut run in line.drain(..) {
        run.line = index;
        ordered.push(run);
    }
}

/// Result of a synthesis attempt that did not fail.
#[derive(Debug)]
pub enum SynthesisOutcome {
    Ready(TextLayer),
    /// The task's ticket was cancelled before it finished.
    Cancelled,
    /// The page was re-rendered while OCR ran; the result was discarded.
    Stale,
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),
}

/// Builds page text layers from a document engine and an optional OCR engine.
pub struct TextLayerSynthesizer<'a> {
    engine: &'a dyn DocumentEngine,
    ocr: Option<&'a dyn OcrEngine>,
    options: TextLayerOptions,
}

impl<'a> TextLayerSynthesizer<'a> {
    pub fn new(engine: &'a dyn DocumentEngine, options: TextLayerOptions) -> Self {
        Self { engine, ocr: None, options }
    }

    pub fn with_ocr(mut self, ocr: &'a dyn OcrEngine) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn options(&self) -> &TextLayerOptions {
        &self.options
    }

    /// Build the layer from native text, or `None` if the page needs OCR.
    ///
    /// A corrupt text listing counts as no text.
    pub fn native_layer(&self, page: u32) -> Result<Option<TextLayer>, EngineError> {
        let size = self.engine.page_size(page)?;
        let items = match self.engine.text_content(page) {
            Ok(items) => items,
            Err(err @ EngineError::PageOutOfRange { .. }) => return Err(err),
            Err(err) => {
                warn!(page, error = %err, "native text listing unreadable, treating page as image-only");
                Vec::new()
            }
        };

        if !has_native_text(&items, self.options.min_native_items) {
            debug!(page, items = items.len(), "page has too little native text");
            return Ok(None);
        }

        match native_runs(&items, size.height) {
            Some(runs) => Ok(Some(TextLayer::new(page, TextSource::Native, runs, &self.options))),
            None => {
                warn!(page, "native text listing malformed, treating page as image-only");
                Ok(None)
            }
        }
    }

    /// Synthesize the text layer for the ticket's page at `scale`.
    ///
    /// Rendering and OCR honour the ticket's cancellation token, and an OCR
    /// result is only returned if the ticket is still current afterwards.
    pub fn synthesize(
        &self,
        ticket: &RenderTicket,
        gate: &RenderGate,
        scale: f32,
    ) -> Result<SynthesisOutcome, SynthesisError> {
        let page = ticket.page();

        if let Some(layer) = self.native_layer(page)? {
            return Ok(SynthesisOutcome::Ready(layer));
        }

        let Some(ocr) = self.ocr else {
            debug!(page, "no OCR engine configured, text layer left empty");
            return Ok(SynthesisOutcome::Ready(TextLayer::empty(page, TextSource::Ocr)));
        };

        let raster_scale = scale * self.options.device_pixel_ratio;
        let raster = match self.engine.render(page, raster_scale, ticket.token()) {
            Ok(raster) => raster,
            Err(EngineError::Cancelled) => return Ok(SynthesisOutcome::Cancelled),
            Err(err) => return Err(err.into()),
        };
        if ticket.is_cancelled() {
            return Ok(SynthesisOutcome::Cancelled);
        }

        let words = ocr.recognize(&raster)?;

        if !gate.is_current(ticket) {
            debug!(page, generation = ticket.generation(), "discarding stale OCR result");
            return Ok(SynthesisOutcome::Stale);
        }

        Ok(SynthesisOutcome::Ready(TextLayer::from_ocr(page, &words, scale, &self.options)))
    }
}
