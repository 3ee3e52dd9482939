//! Tool interaction state machine
//!
//! Turns pointer input into annotation commits and deletions. The machine is
//! pure: it returns a [`ToolEffect`] describing what should happen and leaves
//! persistence to the page session, which routes every commit through the
//! annotation store.

use crate::annotation::{Annotation, Stroke};
use crate::coords::{DocPoint, DocRect, ScreenPoint, Viewport};
use tracing::debug;

/// Explicit tool selection from the toolbar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Cursor,
    Note,
    Ink,
    Eraser,
}

/// Text selected on a page, in document points.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSelection {
    pub page: u32,
    pub rects: Vec<DocRect>,
    pub text: String,
}

impl TextSelection {
    pub fn bounds(&self) -> Option<DocRect> {
        let mut iter = self.rects.iter();
        let first = *iter.next()?;
        Some(iter.fold(first, |acc, rect| acc.union(rect)))
    }
}

/// An open, unsaved note editor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteDraft {
    pub page: u32,
    pub at: DocPoint,
}

/// An ink stroke being drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct InkStroke {
    pub page: u32,
    pub points: Vec<DocPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolState {
    /// Default. Text selection is active.
    Cursor,
    /// A selection exists and can be committed as a highlight.
    HighlightPending(TextSelection),
    /// Next click opens a draft note; `Some` while a draft is open.
    Note(Option<NoteDraft>),
    /// `Some` while the pointer is down.
    Ink(Option<InkStroke>),
    Eraser,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { page: u32, position: ScreenPoint },
    Move { page: u32, position: ScreenPoint },
    Up { page: u32, position: ScreenPoint },
}

impl PointerEvent {
    fn page(&self) -> u32 {
        match *self {
            PointerEvent::Down { page, .. }
            | PointerEvent::Move { page, .. }
            | PointerEvent::Up { page, .. } => page,
        }
    }

    fn position(&self) -> ScreenPoint {
        match *self {
            PointerEvent::Down { position, .. }
            | PointerEvent::Move { position, .. }
            | PointerEvent::Up { position, .. } => position,
        }
    }
}

/// Feedback for a rejected user operation. No state changes accompany it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ToolFeedback {
    #[error("burned content cannot be removed")]
    BurnedImmutable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolEffect {
    None,
    /// Persist a new annotation.
    Commit(Annotation),
    /// Remove an annotation from the visible set.
    Delete(Annotation),
    OpenNoteEditor(NoteDraft),
    Feedback(ToolFeedback),
}

#[derive(Debug, Clone)]
pub struct ToolMachine {
    state: ToolState,
    highlight_style: Stroke,
    ink_style: Stroke,
    hit_tolerance: f32,
}

impl Default for ToolMachine {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl ToolMachine {
    pub fn new(hit_tolerance: f32) -> Self {
        Self {
            state: ToolState::Cursor,
            highlight_style: Stroke::highlight(),
            ink_style: Stroke::ink(),
            hit_tolerance,
        }
    }

    pub fn with_highlight_style(mut self, style: Stroke) -> Self {
        self.highlight_style = style;
        self
    }

    pub fn with_ink_style(mut self, style: Stroke) -> Self {
        self.ink_style = style;
        self
    }

    pub fn state(&self) -> &ToolState {
        &self.state
    }

    pub fn tool(&self) -> Tool {
        match self.state {
            ToolState::Cursor | ToolState::HighlightPending(_) => Tool::Cursor,
            ToolState::Note(_) => Tool::Note,
            ToolState::Ink(_) => Tool::Ink,
            ToolState::Eraser => Tool::Eraser,
        }
    }

    /// Switch tools. Any in-progress draft (open note, pending selection,
    /// half-drawn stroke) is discarded. Returns whether one was.
    pub fn select_tool(&mut self, tool: Tool) -> bool {
        let had_draft = matches!(
            self.state,
            ToolState::HighlightPending(_) | ToolState::Note(Some(_)) | ToolState::Ink(Some(_))
        );
        if had_draft {
            debug!(?tool, "tool change cancelled draft");
        }
        self.state = match tool {
            Tool::Cursor => ToolState::Cursor,
            Tool::Note => ToolState::Note(None),
            Tool::Ink => ToolState::Ink(None),
            Tool::Eraser => ToolState::Eraser,
        };
        had_draft
    }

    /// A text selection was made (or changed) with the cursor tool.
    pub fn report_selection(&mut self, selection: TextSelection) {
        if !matches!(self.state, ToolState::Cursor | ToolState::HighlightPending(_)) {
            return;
        }
        self.state = if selection.rects.is_empty() || selection.text.trim().is_empty() {
            ToolState::Cursor
        } else {
            ToolState::HighlightPending(selection)
        };
    }

    pub fn clear_selection(&mut self) {
        if matches!(self.state, ToolState::HighlightPending(_)) {
            self.state = ToolState::Cursor;
        }
    }

    /// Commit the pending selection as a highlight.
    pub fn commit_highlight(&mut self) -> ToolEffect {
        let ToolState::HighlightPending(selection) = &self.state else {
            return ToolEffect::None;
        };
        let effect = match selection.bounds() {
            Some(bounds) => ToolEffect::Commit(Annotation::highlight(
                selection.page,
                bounds,
                selection.text.trim(),
                self.highlight_style,
            )),
            None => ToolEffect::None,
        };
        self.state = ToolState::Cursor;
        effect
    }

    /// Save the open note draft with `text`. Empty text discards the draft.
    pub fn submit_note(&mut self, text: &str) -> ToolEffect {
        let ToolState::Note(Some(draft)) = self.state else {
            return ToolEffect::None;
        };
        self.state = ToolState::Note(None);
        if text.trim().is_empty() {
            return ToolEffect::None;
        }
        ToolEffect::Commit(Annotation::note(draft.page, draft.at, text))
    }

    pub fn cancel_note(&mut self) {
        if let ToolState::Note(Some(_)) = self.state {
            self.state = ToolState::Note(None);
        }
    }

    /// Feed a pointer event. `viewport` positions the event's page on screen;
    /// `visible` is the page view's current visible set, topmost last.
    pub fn pointer(
        &mut self,
        event: PointerEvent,
        viewport: &Viewport,
        visible: &[Annotation],
    ) -> ToolEffect {
        let page = event.page();
        let point = viewport.to_document(event.position());

        match (&mut self.state, event) {
            (ToolState::Note(draft), PointerEvent::Down { .. }) => {
                let opened = NoteDraft { page, at: point };
                *draft = Some(opened);
                ToolEffect::OpenNoteEditor(opened)
            }

            (ToolState::Ink(stroke), PointerEvent::Down { .. }) => {
                *stroke = Some(InkStroke { page, points: vec![point] });
                ToolEffect::None
            }
            (ToolState::Ink(Some(stroke)), PointerEvent::Move { .. }) => {
                if stroke.page == page && stroke.points.last() != Some(&point) {
                    stroke.points.push(point);
                }
                ToolEffect::None
            }
            (ToolState::Ink(stroke), PointerEvent::Up { .. }) => match stroke.take() {
                Some(finished) if finished.points.len() >= 2 => ToolEffect::Commit(
                    Annotation::ink(finished.page, finished.points, self.ink_style),
                ),
                Some(finished) => {
                    debug!(points = finished.points.len(), "discarding ink stroke shorter than 2 points");
                    ToolEffect::None
                }
                None => ToolEffect::None,
            },

            (ToolState::Eraser, PointerEvent::Down { .. }) => {
                let hit = visible
                    .iter()
                    .rev()
                    .find(|a| a.page == page && a.hit_test(&point, self.hit_tolerance));
                match hit {
                    Some(target) if !target.is_erasable() => {
                        ToolEffect::Feedback(ToolFeedback::BurnedImmutable)
                    }
                    Some(target) => ToolEffect::Delete(target.clone()),
                    None => ToolEffect::None,
                }
            }

            _ => ToolEffect::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationKind;

    fn viewport() -> Viewport {
        Viewport::new(ScreenPoint::new(100.0, 50.0), 2.0)
    }

    fn down(x: f32, y: f32) -> PointerEvent {
        PointerEvent::Down { page: 1, position: ScreenPoint::new(x, y) }
    }

    fn moved(x: f32, y: f32) -> PointerEvent {
        PointerEvent::Move { page: 1, position: ScreenPoint::new(x, y) }
    }

    fn up(x: f32, y: f32) -> PointerEvent {
        PointerEvent::Up { page: 1, position: ScreenPoint::new(x, y) }
    }

    fn selection() -> TextSelection {
        TextSelection {
            page: 1,
            rects: vec![DocRect::new(72.0, 100.0, 200.0, 12.0), DocRect::new(72.0, 114.0, 80.0, 12.0)],
            text: " two lines of text ".to_string(),
        }
    }

    #[test]
    fn test_initial_state_is_cursor() {
        let machine = ToolMachine::default();
        assert_eq!(machine.state(), &ToolState::Cursor);
        assert_eq!(machine.tool(), Tool::Cursor);
    }

    #[test]
    fn test_ink_stroke_commits_in_document_points() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Ink);

        assert_eq!(machine.pointer(down(120.0, 70.0), &viewport(), &[]), ToolEffect::None);
        machine.pointer(moved(140.0, 90.0), &viewport(), &[]);
        let effect = machine.pointer(up(140.0, 90.0), &viewport(), &[]);

        let ToolEffect::Commit(ink) = effect else { panic!("expected commit, got {effect:?}") };
        assert_eq!(ink.kind(), AnnotationKind::Ink);
        assert_eq!(ink.points(), &[DocPoint::new(10.0, 10.0), DocPoint::new(20.0, 20.0)]);
        assert_eq!(machine.state(), &ToolState::Ink(None));
    }

    #[test]
    fn test_click_without_move_produces_no_ink() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Ink);

        machine.pointer(down(120.0, 70.0), &viewport(), &[]);
        let effect = machine.pointer(up(120.0, 70.0), &viewport(), &[]);

        assert_eq!(effect, ToolEffect::None);
    }

    #[test]
    fn test_move_to_same_point_does_not_extend_stroke() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Ink);

        machine.pointer(down(120.0, 70.0), &viewport(), &[]);
        machine.pointer(moved(120.0, 70.0), &viewport(), &[]);
        assert_eq!(machine.pointer(up(120.0, 70.0), &viewport(), &[]), ToolEffect::None);
    }

    #[test]
    fn test_highlight_from_selection() {
        let mut machine = ToolMachine::default();
        machine.report_selection(selection());
        assert!(matches!(machine.state(), ToolState::HighlightPending(_)));

        let ToolEffect::Commit(highlight) = machine.commit_highlight() else {
            panic!("expected a highlight commit");
        };
        assert_eq!(highlight.bbox, DocRect::new(72.0, 100.0, 200.0, 26.0));
        assert_eq!(highlight.text(), Some("two lines of text"));
        assert_eq!(machine.state(), &ToolState::Cursor);
    }

    #[test]
    fn test_blank_selection_stays_in_cursor() {
        let mut machine = ToolMachine::default();
        machine.report_selection(TextSelection { page: 1, rects: vec![], text: String::new() });
        assert_eq!(machine.state(), &ToolState::Cursor);
        assert_eq!(machine.commit_highlight(), ToolEffect::None);
    }

    #[test]
    fn test_selection_ignored_outside_cursor() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Ink);
        machine.report_selection(selection());
        assert_eq!(machine.state(), &ToolState::Ink(None));
    }

    #[test]
    fn test_note_click_opens_draft_and_submit_commits() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Note);

        let effect = machine.pointer(down(300.0, 250.0), &viewport(), &[]);
        assert_eq!(
            effect,
            ToolEffect::OpenNoteEditor(NoteDraft { page: 1, at: DocPoint::new(100.0, 100.0) })
        );

        let ToolEffect::Commit(note) = machine.submit_note("follow up") else {
            panic!("expected note commit");
        };
        assert_eq!(note.kind(), AnnotationKind::Note);
        assert_eq!(note.text(), Some("follow up"));
        assert_eq!(machine.state(), &ToolState::Note(None));
    }

    #[test]
    fn test_empty_note_is_discarded() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Note);
        machine.pointer(down(300.0, 250.0), &viewport(), &[]);

        assert_eq!(machine.submit_note("   "), ToolEffect::None);
        assert_eq!(machine.state(), &ToolState::Note(None));
    }

    #[test]
    fn test_tool_change_cancels_open_note() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Note);
        machine.pointer(down(300.0, 250.0), &viewport(), &[]);

        assert!(machine.select_tool(Tool::Ink));
        assert_eq!(machine.submit_note("lost"), ToolEffect::None);
    }

    #[test]
    fn test_tool_change_cancels_stroke_and_selection() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Ink);
        machine.pointer(down(120.0, 70.0), &viewport(), &[]);
        assert!(machine.select_tool(Tool::Cursor));

        machine.report_selection(selection());
        assert!(machine.select_tool(Tool::Eraser));
        assert!(!machine.select_tool(Tool::Eraser));
    }

    #[test]
    fn test_eraser_deletes_topmost_local_annotation() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Eraser);
        let below = Annotation::note(1, DocPoint::new(5.0, 5.0), "below").with_id("a");
        let above = Annotation::note(1, DocPoint::new(8.0, 8.0), "above").with_id("b");

        let effect = machine.pointer(down(120.0, 70.0), &viewport(), &[below, above.clone()]);
        assert_eq!(effect, ToolEffect::Delete(above));
    }

    #[test]
    fn test_eraser_refuses_burned_annotation() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Eraser);
        let mut burned =
            Annotation::highlight(1, DocRect::new(0.0, 0.0, 50.0, 50.0), "x", Stroke::highlight());
        burned.burned = true;

        let effect = machine.pointer(down(120.0, 70.0), &viewport(), &[burned]);
        assert_eq!(effect, ToolEffect::Feedback(ToolFeedback::BurnedImmutable));
        assert_eq!(machine.state(), &ToolState::Eraser);
    }

    #[test]
    fn test_eraser_ignores_other_pages() {
        let mut machine = ToolMachine::default();
        machine.select_tool(Tool::Eraser);
        let mut note = Annotation::note(2, DocPoint::new(5.0, 5.0), "page two");
        note.id = Some("n".into());

        assert_eq!(machine.pointer(down(120.0, 70.0), &viewport(), &[note]), ToolEffect::None);
    }
}
