//! Durable annotation store backed by one JSON file per document.
//!
//! Each document's local annotations live in
//! `<root>/<document-id>.annotations.json` as a versioned envelope. Files are
//! replaced atomically on every write. An id → document index is rebuilt
//! from the files when the store is opened so `delete` can find a record by
//! id alone.

use directories::ProjectDirs;
use pagemark_core::annotation::{Annotation, AnnotationId, DocumentId};
use pagemark_core::record::AnnotationRecord;
use pagemark_core::store::{prepare_for_put, sort_for_listing, AnnotationStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

const STORE_SCHEMA_VERSION: u32 = 1;
const FILE_SUFFIX: &str = ".annotations.json";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentEnvelope {
    version: u32,
    document: DocumentId,
    annotations: Vec<AnnotationRecord>,
}

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    index: Mutex<HashMap<AnnotationId, DocumentId>>,
}

impl FileStore {
    /// Open the store in the platform's local data directory.
    pub fn from_default_project() -> Result<Self, StoreError> {
        let dirs = ProjectDirs::from("dev", "Pagemark", "pagemark").ok_or(StoreError::NoDataDirectory)?;
        Self::open(dirs.data_local_dir())
    }

    /// Open the store rooted at `root`. The directory is created on first write.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let index = build_index(&root)?;
        debug!(root = %root.display(), records = index.len(), "file store opened");
        Ok(Self { root, index: Mutex::new(index) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a configuration file for this store would live.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    fn document_path(&self, document: &str) -> PathBuf {
        self.root.join(format!("{}{FILE_SUFFIX}", file_stem(document)))
    }

    fn read_records(&self, document: &str) -> Result<Vec<AnnotationRecord>, StoreError> {
        let path = self.document_path(document);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let envelope = read_envelope(&path)?;
        if envelope.document != document {
            return Err(StoreError::Unavailable(format!(
                "{} belongs to document {:?}",
                path.display(),
                envelope.document
            )));
        }
        Ok(envelope.annotations)
    }

    fn write_records(&self, document: &str, annotations: Vec<AnnotationRecord>) -> Result<(), StoreError> {
        let path = self.document_path(document);
        if annotations.is_empty() {
            if path.exists() {
                fs::remove_file(&path)?;
            }
            return Ok(());
        }

        fs::create_dir_all(&self.root)?;
        let envelope = DocumentEnvelope {
            version: STORE_SCHEMA_VERSION,
            document: document.to_string(),
            annotations,
        };
        let json = serde_json::to_vec_pretty(&envelope)?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn remove_from(&self, document: &str, id: &str) -> Result<bool, StoreError> {
        let mut records = self.read_records(document)?;
        let before = records.len();
        records.retain(|record| record.id.as_deref() != Some(id));
        if records.len() == before {
            return Ok(false);
        }
        self.write_records(document, records)?;
        Ok(true)
    }
}

impl AnnotationStore for FileStore {
    fn put(&self, document: &DocumentId, annotation: Annotation) -> Result<Annotation, StoreError> {
        let annotation = prepare_for_put(annotation)?;
        let id = annotation.id.clone().unwrap_or_default();

        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = index.get(&id).filter(|owner| *owner != document).cloned() {
            self.remove_from(&previous, &id)?;
            index.remove(&id);
            debug!(%id, from = %previous, to = %document, "annotation moved between documents");
        }

        let mut records = self.read_records(document)?;
        let record = AnnotationRecord::from(&annotation);
        let replaced = match records.iter_mut().find(|r| r.id.as_deref() == Some(id.as_str())) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => {
                records.push(record);
                false
            }
        };
        self.write_records(document, records)?;
        index.insert(id.clone(), document.clone());

        info!(%document, %id, kind = %annotation.kind(), replaced, "annotation stored");
        Ok(annotation)
    }

    fn list_by_document(&self, document: &DocumentId) -> Result<Vec<Annotation>, StoreError> {
        let mut annotations = Vec::new();
        for record in self.read_records(document)? {
            annotations.push(record.into_annotation(false)?);
        }
        sort_for_listing(&mut annotations);
        Ok(annotations)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(document) = index.get(id).cloned() else {
            return Ok(false);
        };

        let removed = self.remove_from(&document, id)?;
        index.remove(id);
        if removed {
            info!(%document, %id, "annotation deleted");
        }
        Ok(removed)
    }
}

fn read_envelope(path: &Path) -> Result<DocumentEnvelope, StoreError> {
    let bytes = fs::read(path)?;
    let envelope: DocumentEnvelope = serde_json::from_slice(&bytes)?;
    if envelope.version > STORE_SCHEMA_VERSION {
        return Err(StoreError::Unavailable(format!(
            "{} uses schema version {}, newest supported is {STORE_SCHEMA_VERSION}",
            path.display(),
            envelope.version
        )));
    }
    Ok(envelope)
}

fn build_index(root: &Path) -> Result<HashMap<AnnotationId, DocumentId>, StoreError> {
    let mut index = HashMap::new();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let path = entry?.path();
        let is_store_file =
            path.file_name().and_then(|name| name.to_str()).is_some_and(|name| name.ends_with(FILE_SUFFIX));
        if !is_store_file {
            continue;
        }
        match read_envelope(&path) {
            Ok(envelope) => {
                for id in envelope.annotations.into_iter().filter_map(|record| record.id) {
                    index.insert(id, envelope.document.clone());
                }
            }
            Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable annotation file"),
        }
    }
    Ok(index)
}

/// File-name-safe form of a document id. Unsafe bytes are escaped as `~xx`,
/// so distinct ids never share a file.
fn file_stem(document: &str) -> String {
    let mut stem = String::with_capacity(document.len());
    for (position, byte) in document.bytes().enumerate() {
        let safe = byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') || (byte == b'.' && position > 0);
        if safe {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("~{byte:02x}"));
        }
    }
    if stem.is_empty() {
        stem.push('~');
    }
    stem
}
