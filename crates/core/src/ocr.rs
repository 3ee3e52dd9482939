//! OCR collaborator interface and background dispatch
//!
//! OCR runs off the interaction thread. The dispatcher owns a worker thread
//! that receives complete rasters by message and sends recognized words
//! back; every job carries the [`RenderTicket`] it was started with, and a
//! result is applied only if that ticket is still current when it arrives.

use crate::coords::ScreenRect;
use crate::engine::Raster;
use crate::text_layer::{TextLayer, TextLayerOptions};
use pagemark_scheduler::{MessageWorker, RenderGate, RenderTicket, WorkerError};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// A recognized word with its box in raster pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub bbox: ScreenRect,
    /// Engine-reported confidence, 0-100.
    pub confidence: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR backend not available: {0}")]
    BackendNotAvailable(String),
    #[error("OCR failed: {0}")]
    Failed(String),
    #[error("raster is empty or has inconsistent dimensions")]
    InvalidRaster,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Text recognition over a page raster.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, raster: &Raster) -> Result<Vec<OcrWord>, OcrError>;
}

/// A page raster queued for recognition.
#[derive(Debug)]
pub struct OcrJob {
    pub ticket: RenderTicket,
    pub raster: Raster,
    /// Display scale the raster was rendered for (before device pixel ratio).
    pub scale: f32,
}

#[derive(Debug)]
enum Recognition {
    Words(Vec<OcrWord>),
    Cancelled,
    Failed(OcrError),
}

#[derive(Debug)]
pub struct OcrReply {
    ticket: RenderTicket,
    scale: f32,
    recognition: Recognition,
}

/// What became of a finished OCR job.
#[derive(Debug)]
pub enum OcrOutcome {
    Applied(TextLayer),
    /// The page moved to a newer generation while OCR ran.
    Stale { page: u32, generation: u64 },
    Cancelled { page: u32 },
    Failed { page: u32, error: OcrError },
}

/// Runs OCR jobs on a dedicated worker thread.
pub struct OcrDispatcher {
    worker: MessageWorker<OcrJob, OcrReply>,
    options: TextLayerOptions,
}

impl OcrDispatcher {
    pub fn spawn(engine: Arc<dyn OcrEngine>, options: TextLayerOptions) -> io::Result<Self> {
        let worker = MessageWorker::spawn("ocr", move |job: OcrJob| {
            let recognition = if job.ticket.is_cancelled() {
                Recognition::Cancelled
            } else if !job.raster.is_valid() {
                Recognition::Failed(OcrError::InvalidRaster)
            } else {
                match engine.recognize(&job.raster) {
                    Ok(words) => Recognition::Words(words),
                    Err(error) => Recognition::Failed(error),
                }
            };
            OcrReply { ticket: job.ticket, scale: job.scale, recognition }
        })?;

        Ok(Self { worker, options })
    }

    /// Queue a job; the raster moves to the worker.
    pub fn submit(&self, job: OcrJob) -> Result<(), WorkerError> {
        debug!(page = job.ticket.page(), generation = job.ticket.generation(), "OCR job queued");
        self.worker.submit(job)
    }

    /// Wait for the next job to finish and resolve it against `gate`.
    pub fn recv(&self, gate: &RenderGate) -> Result<OcrOutcome, WorkerError> {
        let reply = self.worker.recv()?;
        Ok(self.resolve(reply, gate))
    }

    /// Resolve a finished job if one is ready.
    pub fn try_recv(&self, gate: &RenderGate) -> Result<Option<OcrOutcome>, WorkerError> {
        Ok(self.worker.try_recv()?.map(|reply| self.resolve(reply, gate)))
    }

    fn resolve(&self, reply: OcrReply, gate: &RenderGate) -> OcrOutcome {
        let page = reply.ticket.page();
        match reply.recognition {
            Recognition::Cancelled => OcrOutcome::Cancelled { page },
            Recognition::Failed(error) => {
                warn!(page, error = %error, "OCR failed");
                OcrOutcome::Failed { page, error }
            }
            Recognition::Words(_) if !gate.is_current(&reply.ticket) => {
                let generation = reply.ticket.generation();
                debug!(page, generation, current = gate.generation(page), "discarding stale OCR result");
                OcrOutcome::Stale { page, generation }
            }
            Recognition::Words(words) => {
                OcrOutcome::Applied(TextLayer::from_ocr(page, &words, reply.scale, &self.options))
            }
        }
    }
}
