//! Page view session
//!
//! A [`PageSession`] owns the visible annotation set of one open document.
//! The set is never edited in place: every mutation goes through the store
//! (or the embedded baseline) and the set is recomputed with
//! [`merge_with_tolerance`].

use crate::annotation::{Annotation, DocumentId, ModelError};
use crate::config::AnnotatorConfig;
use crate::coords::Viewport;
use crate::embedded::decode_embedded;
use crate::engine::DocumentEngine;
use crate::reconcile::{is_duplicate, merge_with_tolerance};
use crate::store::{prepare_for_put, AnnotationStore, StoreError};
use crate::tools::{PointerEvent, ToolEffect, ToolFeedback, ToolMachine};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("{0}")]
    Rejected(ToolFeedback),
}

pub struct PageSession {
    document: DocumentId,
    page_count: u32,
    store: Arc<dyn AnnotationStore>,
    /// Baseline read from document metadata.
    embedded: Vec<Annotation>,
    /// Last successful store listing.
    local: Vec<Annotation>,
    /// Committed records whose persist failed; still visible.
    pending: Vec<Annotation>,
    visible: Vec<Annotation>,
    tolerance: f32,
    tools: ToolMachine,
}

impl std::fmt::Debug for PageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSession")
            .field("document", &self.document)
            .field("page_count", &self.page_count)
            .field("embedded", &self.embedded.len())
            .field("local", &self.local.len())
            .field("pending", &self.pending.len())
            .field("visible", &self.visible.len())
            .finish()
    }
}

impl PageSession {
    /// Open a session from the document's metadata keywords field.
    pub fn open(
        document: impl Into<DocumentId>,
        page_count: u32,
        keywords: Option<&str>,
        store: Arc<dyn AnnotationStore>,
        config: &AnnotatorConfig,
    ) -> Result<Self, SessionError> {
        let document = document.into();
        let local = store.list_by_document(&document)?;
        let mut session = Self {
            document,
            page_count,
            store,
            embedded: decode_embedded(keywords),
            local,
            pending: Vec::new(),
            visible: Vec::new(),
            tolerance: config.merge_tolerance,
            tools: ToolMachine::new(config.hit_tolerance),
        };
        session.recompute();
        info!(
            document = %session.document,
            embedded = session.embedded.len(),
            local = session.local.len(),
            visible = session.visible.len(),
            "session opened"
        );
        Ok(session)
    }

    pub fn open_with_engine(
        document: impl Into<DocumentId>,
        engine: &dyn DocumentEngine,
        store: Arc<dyn AnnotationStore>,
        config: &AnnotatorConfig,
    ) -> Result<Self, SessionError> {
        let keywords = engine.metadata_keywords();
        Self::open(document, engine.page_count(), keywords.as_deref(), store, config)
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// The reconciled set, local records first.
    pub fn visible(&self) -> &[Annotation] {
        &self.visible
    }

    pub fn visible_on_page(&self, page: u32) -> Vec<&Annotation> {
        self.visible.iter().filter(|a| a.page == page).collect()
    }

    pub fn embedded(&self) -> &[Annotation] {
        &self.embedded
    }

    /// Records committed but not yet durable.
    pub fn pending(&self) -> &[Annotation] {
        &self.pending
    }

    pub fn tools(&self) -> &ToolMachine {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolMachine {
        &mut self.tools
    }

    /// Persist a new or edited annotation and recompute.
    ///
    /// If the store fails, the record stays visible as pending and the error
    /// is returned so the caller can offer a retry.
    pub fn commit(&mut self, annotation: Annotation) -> Result<Annotation, SessionError> {
        annotation.validate(self.page_count)?;
        let annotation = prepare_for_put(annotation)?;

        let result = self.store.put(&self.document, annotation.clone());
        match result {
            Ok(stored) => {
                self.pending.retain(|p| p.id != stored.id);
                upsert(&mut self.local, stored.clone());
                self.recompute();
                Ok(stored)
            }
            Err(error) => {
                warn!(document = %self.document, id = ?annotation.id, error = %error, "persist failed, keeping record pending");
                upsert(&mut self.pending, annotation);
                self.recompute();
                Err(error.into())
            }
        }
    }

    /// Remove an annotation from the visible set.
    ///
    /// Burned highlights and ink are rejected. A note that only exists in the
    /// embedded baseline is dismissed from it; the next burn drops it from
    /// metadata.
    pub fn erase(&mut self, target: &Annotation) -> Result<bool, SessionError> {
        if !target.is_erasable() {
            debug!(id = ?target.id, kind = %target.kind(), "refusing to erase burned annotation");
            return Err(SessionError::Rejected(ToolFeedback::BurnedImmutable));
        }

        let in_local = self.local.iter().chain(&self.pending).any(|a| same_record(a, target));
        let removed = if in_local {
            if let Some(id) = target.id() {
                self.store.delete(id)?;
            }
            self.local.retain(|a| !same_record(a, target));
            self.pending.retain(|a| !same_record(a, target));
            // An edited embedded note is shadowed by its local copy; drop both.
            let before = self.embedded.len();
            self.embedded.retain(|a| !(a.is_erasable() && same_record(a, target)));
            if self.embedded.len() < before {
                debug!(id = ?target.id, "dismissing embedded note shadowed by local edit");
            }
            true
        } else if let Some(index) = self.embedded.iter().position(|a| same_record(a, target)) {
            debug!(id = ?target.id, "dismissing embedded note");
            self.embedded.remove(index);
            true
        } else if let Some(id) = target.id() {
            self.store.delete(id)?
        } else {
            false
        };

        self.recompute();
        Ok(removed)
    }

    /// Apply a tool effect through the store.
    pub fn dispatch(&mut self, effect: ToolEffect) -> Result<Option<Annotation>, SessionError> {
        match effect {
            ToolEffect::Commit(annotation) => self.commit(annotation).map(Some),
            ToolEffect::Delete(annotation) => self.erase(&annotation).map(|_| None),
            ToolEffect::Feedback(feedback) => Err(SessionError::Rejected(feedback)),
            ToolEffect::OpenNoteEditor(_) | ToolEffect::None => Ok(None),
        }
    }

    /// Feed a pointer event to the tool machine and apply what it produces.
    ///
    /// Returns the effect so the caller can open editors or show feedback.
    pub fn pointer(
        &mut self,
        event: PointerEvent,
        viewport: &Viewport,
    ) -> Result<ToolEffect, SessionError> {
        let effect = self.tools.pointer(event, viewport, &self.visible);
        match &effect {
            ToolEffect::Commit(_) | ToolEffect::Delete(_) => {
                self.dispatch(effect.clone())?;
            }
            ToolEffect::Feedback(feedback) => debug!(%feedback, "tool feedback"),
            ToolEffect::OpenNoteEditor(_) | ToolEffect::None => {}
        }
        Ok(effect)
    }

    pub fn submit_note(&mut self, text: &str) -> Result<Option<Annotation>, SessionError> {
        let effect = self.tools.submit_note(text);
        self.dispatch(effect)
    }

    pub fn commit_highlight(&mut self) -> Result<Option<Annotation>, SessionError> {
        let effect = self.tools.commit_highlight();
        self.dispatch(effect)
    }

    /// Replace the embedded baseline, e.g. after loading another copy of the
    /// document.
    pub fn reload_embedded(&mut self, keywords: Option<&str>) {
        self.embedded = decode_embedded(keywords);
        self.recompute();
    }

    /// Adopt the metadata of freshly burned bytes as the new baseline.
    ///
    /// Local records now carried by the baseline are deleted from the store
    /// so they are not shown twice after the next load.
    pub fn apply_burn(&mut self, keywords: Option<&str>) -> Result<usize, SessionError> {
        self.embedded = decode_embedded(keywords);

        let superseded: Vec<Annotation> = self
            .local
            .iter()
            .chain(self.pending.iter())
            .filter(|a| self.embedded.iter().any(|e| is_duplicate(a, e, self.tolerance)))
            .cloned()
            .collect();

        let mut first_error = None;
        for annotation in &superseded {
            if let Some(id) = annotation.id() {
                if let Err(error) = self.store.delete(id) {
                    warn!(%id, error = %error, "failed to clear burned record from store");
                    first_error.get_or_insert(error);
                    continue;
                }
            }
            self.local.retain(|a| !same_record(a, annotation));
            self.pending.retain(|a| !same_record(a, annotation));
        }

        self.recompute();
        info!(document = %self.document, cleared = superseded.len(), visible = self.visible.len(), "burn applied");
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(superseded.len()),
        }
    }

    /// Re-attempt every pending persist. Returns how many are still pending.
    pub fn retry_pending(&mut self) -> usize {
        for annotation in std::mem::take(&mut self.pending) {
            match self.store.put(&self.document, annotation.clone()) {
                Ok(stored) => upsert(&mut self.local, stored),
                Err(error) => {
                    warn!(id = ?annotation.id, error = %error, "retry failed");
                    self.pending.push(annotation);
                }
            }
        }
        self.recompute();
        self.pending.len()
    }

    /// Re-read the store and recompute.
    pub fn refresh(&mut self) -> Result<(), SessionError> {
        self.local = self.store.list_by_document(&self.document)?;
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        let mut local = self.local.clone();
        local.extend(self.pending.iter().cloned());
        self.visible = merge_with_tolerance(&local, &self.embedded, self.tolerance);
        debug!(document = %self.document, visible = self.visible.len(), "visible set recomputed");
    }
}

fn same_record(a: &Annotation, b: &Annotation) -> bool {
    match (a.id(), b.id()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn upsert(records: &mut Vec<Annotation>, annotation: Annotation) {
    match records.iter_mut().find(|r| same_record(r, &annotation)) {
        Some(slot) => *slot = annotation,
        None => records.push(annotation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{AnnotationBody, AnnotationKind, Stroke};
    use crate::coords::{DocPoint, DocRect, ScreenPoint};
    use crate::embedded::{encode_embedded, replace_payload};
    use crate::store::MemoryStore;
    use crate::tools::Tool;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store whose writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    impl AnnotationStore for FlakyStore {
        fn put(&self, document: &DocumentId, annotation: Annotation) -> Result<Annotation, StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("disk full".to_string()));
            }
            self.inner.put(document, annotation)
        }

        fn list_by_document(&self, document: &DocumentId) -> Result<Vec<Annotation>, StoreError> {
            self.inner.list_by_document(document)
        }

        fn delete(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }
    }

    fn open(store: Arc<dyn AnnotationStore>, keywords: Option<&str>) -> PageSession {
        PageSession::open("doc", 2, keywords, store, &AnnotatorConfig::default()).unwrap()
    }

    fn burn_keywords(annotations: &[Annotation]) -> String {
        replace_payload(Some("report"), &encode_embedded(annotations).unwrap())
    }

    fn highlight() -> Annotation {
        Annotation::highlight(1, DocRect::new(72.0, 100.0, 120.0, 14.0), "alpha", Stroke::highlight())
    }

    fn ink() -> Annotation {
        Annotation::ink(1, vec![DocPoint::new(10.0, 10.0), DocPoint::new(40.0, 30.0)], Stroke::ink())
    }

    #[test]
    fn test_commit_persists_and_shows() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open(store.clone(), None);

        let stored = session.commit(highlight()).unwrap();

        assert!(stored.id.is_some());
        assert_eq!(session.visible(), &[stored]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_commit_rejects_page_out_of_range() {
        let mut session = open(Arc::new(MemoryStore::new()), None);
        let mut annotation = highlight();
        annotation.page = 3;

        assert!(matches!(
            session.commit(annotation),
            Err(SessionError::Model(ModelError::PageOutOfRange { page: 3, page_count: 2 }))
        ));
        assert!(session.visible().is_empty());
    }

    #[test]
    fn test_failed_persist_stays_visible_and_retries() {
        let store = Arc::new(FlakyStore::default());
        let mut session = open(store.clone(), None);
        store.failing.store(true, Ordering::SeqCst);

        assert!(matches!(session.commit(highlight()), Err(SessionError::Store(_))));
        assert_eq!(session.visible().len(), 1);
        assert_eq!(session.pending().len(), 1);
        assert_eq!(session.retry_pending(), 1);

        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(session.retry_pending(), 0);
        assert_eq!(session.visible().len(), 1);
        assert_eq!(store.list_by_document(&"doc".to_string()).unwrap().len(), 1);
    }

    #[test]
    fn test_embedded_records_are_merged_on_open() {
        let keywords = burn_keywords(&[highlight().with_id("h1")]);
        let session = open(Arc::new(MemoryStore::new()), Some(&keywords));

        assert_eq!(session.visible().len(), 1);
        assert!(session.visible()[0].burned);
    }

    #[test]
    fn test_erase_burned_highlight_is_rejected_without_change() {
        let keywords = burn_keywords(&[highlight().with_id("h1")]);
        let mut session = open(Arc::new(MemoryStore::new()), Some(&keywords));
        let before = session.visible().to_vec();

        let target = before[0].clone();
        assert!(matches!(
            session.erase(&target),
            Err(SessionError::Rejected(ToolFeedback::BurnedImmutable))
        ));
        assert_eq!(session.visible(), before.as_slice());
    }

    #[test]
    fn test_erase_embedded_note_dismisses_it() {
        let note = Annotation::note(1, DocPoint::new(5.0, 5.0), "keep?").with_id("n1");
        let keywords = burn_keywords(&[note]);
        let mut session = open(Arc::new(MemoryStore::new()), Some(&keywords));
        let target = session.visible()[0].clone();
        assert!(!target.burned);

        // An embedded note is not in the store, but it is still removable.
        assert!(session.erase(&target).unwrap());
        assert!(session.visible().is_empty());
    }

    #[test]
    fn test_erase_edited_embedded_note_removes_both_copies() {
        let note = Annotation::note(1, DocPoint::new(5.0, 5.0), "old").with_id("n1");
        let keywords = burn_keywords(&[note]);
        let store = Arc::new(MemoryStore::new());
        let mut session = open(store.clone(), Some(&keywords));

        let mut edited = session.visible()[0].clone();
        edited.body = AnnotationBody::Note { text: "new".to_string(), style: None };
        session.commit(edited).unwrap();
        assert_eq!(session.visible().len(), 1);
        assert_eq!(session.visible()[0].text(), Some("new"));

        let target = session.visible()[0].clone();
        assert!(session.erase(&target).unwrap());

        assert!(session.visible().is_empty());
        assert!(session.embedded().is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_burn_then_reload_shows_each_annotation_once() {
        let store: Arc<dyn AnnotationStore> = Arc::new(MemoryStore::new());
        let mut session = open(store.clone(), None);
        let created = |mut annotation: Annotation, at: i64| {
            annotation.created_at = at;
            annotation
        };
        session.commit(created(highlight(), 1)).unwrap();
        session.commit(created(ink(), 2)).unwrap();
        session.commit(created(Annotation::note(1, DocPoint::new(300.0, 300.0), "todo"), 3)).unwrap();
        assert_eq!(session.visible().len(), 3);

        let keywords = burn_keywords(session.visible());
        assert_eq!(session.apply_burn(Some(&keywords)).unwrap(), 3);
        assert_eq!(session.visible().len(), 3);
        assert!(store.list_by_document(&"doc".to_string()).unwrap().is_empty());

        let reopened = open(store, Some(&keywords));
        let kinds: Vec<(AnnotationKind, bool)> =
            reopened.visible().iter().map(|a| (a.kind(), a.burned)).collect();
        assert_eq!(
            kinds,
            vec![
                (AnnotationKind::Highlight, true),
                (AnnotationKind::Ink, true),
                (AnnotationKind::Note, false),
            ]
        );
    }

    #[test]
    fn test_stale_local_copy_is_shadowing_not_doubling() {
        // Local copy survived (e.g. burn done elsewhere): still shown once.
        let store: Arc<dyn AnnotationStore> = Arc::new(MemoryStore::new());
        let mut session = open(store.clone(), None);
        let stored = session.commit(highlight()).unwrap();

        let mut drifted = stored.clone();
        drifted.bbox.x += 0.7;
        drifted.id = None;
        session.reload_embedded(Some(&burn_keywords(&[drifted])));

        assert_eq!(session.visible(), &[stored]);
    }

    #[test]
    fn test_pointer_ink_commits_through_store() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open(store.clone(), None);
        session.tools_mut().select_tool(Tool::Ink);
        let viewport = Viewport::at_scale(1.0);

        let at = |x, y| ScreenPoint::new(x, y);
        session.pointer(PointerEvent::Down { page: 1, position: at(10.0, 10.0) }, &viewport).unwrap();
        session.pointer(PointerEvent::Move { page: 1, position: at(30.0, 25.0) }, &viewport).unwrap();
        let effect =
            session.pointer(PointerEvent::Up { page: 1, position: at(30.0, 25.0) }, &viewport).unwrap();

        assert!(matches!(effect, ToolEffect::Commit(_)));
        assert_eq!(store.len(), 1);
        assert_eq!(session.visible()[0].kind(), AnnotationKind::Ink);
    }

    #[test]
    fn test_pointer_eraser_on_burned_gives_feedback() {
        let keywords = burn_keywords(&[highlight().with_id("h1")]);
        let mut session = open(Arc::new(MemoryStore::new()), Some(&keywords));
        session.tools_mut().select_tool(Tool::Eraser);

        let effect = session
            .pointer(
                PointerEvent::Down { page: 1, position: ScreenPoint::new(100.0, 105.0) },
                &Viewport::at_scale(1.0),
            )
            .unwrap();

        assert_eq!(effect, ToolEffect::Feedback(ToolFeedback::BurnedImmutable));
        assert_eq!(session.visible().len(), 1);
    }

    #[test]
    fn test_submit_note_and_erase_local() {
        let store = Arc::new(MemoryStore::new());
        let mut session = open(store.clone(), None);
        session.tools_mut().select_tool(Tool::Note);
        session
            .pointer(
                PointerEvent::Down { page: 2, position: ScreenPoint::new(50.0, 60.0) },
                &Viewport::at_scale(1.0),
            )
            .unwrap();

        let note = session.submit_note("check figure").unwrap().unwrap();
        assert_eq!(session.visible_on_page(2).len(), 1);

        assert!(session.erase(&note).unwrap());
        assert!(session.visible().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_refresh_picks_up_external_writes() {
        let store: Arc<dyn AnnotationStore> = Arc::new(MemoryStore::new());
        let mut session = open(store.clone(), None);
        store.put(&"doc".to_string(), highlight()).unwrap();

        assert!(session.visible().is_empty());
        session.refresh().unwrap();
        assert_eq!(session.visible().len(), 1);
    }
}
