//! Pagemark Core Library
//!
//! Annotation model and page-view state for the document annotator:
//! coordinates, the local store, the embedded-metadata codec, reconciliation
//! of local and embedded sets, text layer synthesis, and the tool state
//! machine.

pub mod annotation;
pub mod config;
pub mod coords;
pub mod embedded;
pub mod engine;
pub mod ocr;
pub mod reconcile;
pub mod record;
pub mod session;
pub mod store;
pub mod text_layer;
pub mod tools;

pub use annotation::{
    Annotation, AnnotationBody, AnnotationId, AnnotationKind, Color, DocumentId, ModelError,
    Stroke,
};
pub use config::{AnnotatorConfig, ConfigError};
pub use coords::{DocPoint, DocRect, ScreenPoint, ScreenRect, Viewport};
pub use embedded::{decode_embedded, encode_embedded, replace_payload, SENTINEL};
pub use engine::{DocumentEngine, EngineError, PageSize, Raster, TextItem, ViewportSize};
pub use ocr::{OcrDispatcher, OcrEngine, OcrError, OcrJob, OcrOutcome, OcrWord};
pub use reconcile::{is_duplicate, merge, merge_with_tolerance, DEFAULT_MERGE_TOLERANCE};
pub use record::AnnotationRecord;
pub use session::{PageSession, SessionError};
pub use store::{AnnotationStore, MemoryStore, StoreError};
pub use text_layer::{
    SynthesisError, SynthesisOutcome, TextLayer, TextLayerOptions, TextLayerSynthesizer, TextRun,
    TextSource,
};
pub use tools::{
    PointerEvent, Tool, ToolEffect, ToolFeedback, ToolMachine, ToolState, TextSelection,
};
