//! Background burn worker.
//!
//! Burning may take a while on large documents, so it runs on its own
//! thread. Requests and responses carry whole byte buffers by value; nothing
//! is shared with the caller while a burn is in flight.

use crate::burn::{burn_annotations, BurnError};
use pagemark_core::annotation::Annotation;
use pagemark_scheduler::{MessageWorker, WorkerError};
use std::io;
use tracing::{debug, error};

#[derive(Debug)]
pub struct BurnRequest {
    pub source_bytes: Vec<u8>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug)]
pub enum BurnResponse {
    Success { result_bytes: Vec<u8> },
    Failure { error: String },
}

impl BurnResponse {
    pub fn into_result(self) -> Result<Vec<u8>, BurnError> {
        match self {
            BurnResponse::Success { result_bytes } => Ok(result_bytes),
            BurnResponse::Failure { error } => Err(BurnError::Failed(error)),
        }
    }
}

fn compose(request: BurnRequest) -> BurnResponse {
    debug!(bytes = request.source_bytes.len(), annotations = request.annotations.len(), "burn request received");
    match burn_annotations(&request.source_bytes, &request.annotations) {
        Ok(result_bytes) => BurnResponse::Success { result_bytes },
        Err(err) => {
            error!(error = %err, "burn failed");
            BurnResponse::Failure { error: err.to_string() }
        }
    }
}

impl From<WorkerError> for BurnError {
    fn from(_: WorkerError) -> Self {
        BurnError::WorkerGone
    }
}

#[derive(Debug)]
pub struct BurnWorker {
    worker: MessageWorker<BurnRequest, BurnResponse>,
}

impl BurnWorker {
    pub fn spawn() -> io::Result<Self> {
        Self::with_compositor(compose)
    }

    fn with_compositor<F>(compositor: F) -> io::Result<Self>
    where
        F: FnMut(BurnRequest) -> BurnResponse + Send + 'static,
    {
        Ok(Self { worker: MessageWorker::spawn("burn", compositor)? })
    }

    pub fn submit(&self, request: BurnRequest) -> Result<(), BurnError> {
        Ok(self.worker.submit(request)?)
    }

    pub fn recv(&self) -> Result<BurnResponse, BurnError> {
        Ok(self.worker.recv()?)
    }

    /// Burn and wait for the result.
    ///
    /// The caller's `source_bytes` moves into the request; keep a copy if the
    /// original is needed after a failure.
    pub fn burn(
        &self,
        source_bytes: Vec<u8>,
        annotations: Vec<Annotation>,
    ) -> Result<Vec<u8>, BurnError> {
        self.submit(BurnRequest { source_bytes, annotations })?;
        self.recv()?.into_result()
    }

    pub fn shutdown(self) {
        self.worker.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::SamplePdf;
    use pagemark_core::annotation::Stroke;
    use pagemark_core::coords::DocRect;

    fn highlight(page: u32) -> Annotation {
        Annotation::highlight(page, DocRect::new(10.0, 10.0, 50.0, 10.0), "x", Stroke::highlight())
    }

    #[test]
    fn test_burn_off_thread() {
        let worker = BurnWorker::spawn().unwrap();
        let bytes = worker.burn(SamplePdf::new().build(), vec![highlight(1)]).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        worker.shutdown();
    }

    #[test]
    fn test_failure_is_reported_as_message() {
        let worker = BurnWorker::spawn().unwrap();
        worker
            .submit(BurnRequest { source_bytes: SamplePdf::new().build(), annotations: vec![highlight(9)] })
            .unwrap();

        match worker.recv().unwrap() {
            BurnResponse::Failure { error } => assert!(error.contains("page 9")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_worker_survives_failed_request() {
        let worker = BurnWorker::spawn().unwrap();
        assert!(worker.burn(b"nope".to_vec(), vec![]).is_err());
        assert!(worker.burn(SamplePdf::new().build(), vec![]).is_ok());
    }

    #[test]
    fn test_crashed_worker_is_gone() {
        let worker = BurnWorker::with_compositor(|_| panic!("compositor crashed")).unwrap();

        let result = worker.burn(SamplePdf::new().build(), vec![highlight(1)]);
        assert!(matches!(result, Err(BurnError::WorkerGone)));
    }
}
