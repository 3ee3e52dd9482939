//! Local annotation store
//!
//! The store owns every annotation that has not been burned. It is keyed by
//! annotation id and indexed by document. Burned records never enter it: they
//! are reconstructed from the document's embedded metadata on every load.

use crate::annotation::{Annotation, AnnotationId, DocumentId, ModelError};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::io;
use std::sync::{PoisonError, RwLock};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("burned annotations cannot be stored locally")]
    BurnedRecord,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no data directory available")]
    NoDataDirectory,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid annotation: {0}")]
    Model(#[from] ModelError),
}

/// Persistent, document-indexed table of local annotations.
pub trait AnnotationStore: Send + Sync {
    /// Insert or replace an annotation, assigning an id if it has none.
    /// Returns the stored record.
    fn put(&self, document: &DocumentId, annotation: Annotation) -> Result<Annotation, StoreError>;

    /// All annotations for `document`, ordered by page, creation time, then id.
    fn list_by_document(&self, document: &DocumentId) -> Result<Vec<Annotation>, StoreError>;

    /// Remove by id. Returns whether anything was removed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Assign a fresh id if missing and reject burned records.
pub fn prepare_for_put(mut annotation: Annotation) -> Result<Annotation, StoreError> {
    if annotation.burned {
        return Err(StoreError::BurnedRecord);
    }
    if annotation.id.is_none() {
        annotation.id = Some(uuid::Uuid::new_v4().to_string());
    }
    Ok(annotation)
}

/// The listing order every store uses.
pub fn sort_for_listing(annotations: &mut [Annotation]) {
    annotations.sort_by(listing_order);
}

/// Page, then creation time, then id.
pub fn listing_order(a: &Annotation, b: &Annotation) -> Ordering {
    a.page.cmp(&b.page).then(a.created_at.cmp(&b.created_at)).then_with(|| a.id().cmp(&b.id()))
}

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<AnnotationId, (DocumentId, Annotation)>,
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.read().unwrap_or_else(PoisonError::into_inner).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnnotationStore for MemoryStore {
    fn put(&self, document: &DocumentId, annotation: Annotation) -> Result<Annotation, StoreError> {
        let annotation = prepare_for_put(annotation)?;
        let id = annotation.id.clone().unwrap_or_default();

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = tables
            .records
            .insert(id.clone(), (document.clone(), annotation.clone()))
            .is_some();
        info!(%document, %id, kind = %annotation.kind(), replaced, "annotation stored");
        Ok(annotation)
    }

    fn list_by_document(&self, document: &DocumentId) -> Result<Vec<Annotation>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut annotations: Vec<Annotation> = tables
            .records
            .values()
            .filter(|(owner, _)| owner == document)
            .map(|(_, annotation)| annotation.clone())
            .collect();
        sort_for_listing(&mut annotations);
        Ok(annotations)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let removed = tables.records.remove(id).is_some();
        if removed {
            info!(%id, "annotation deleted");
        }
        Ok(removed)
    }
}
