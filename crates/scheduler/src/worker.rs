//! Message-passing background worker.
//!
//! A worker owns one named thread. Requests go in over a channel, the
//! handler runs on the worker thread, and responses come back over a second
//! channel. Payloads move by value, so nothing is shared mutably between the
//! caller and the worker.

use std::fmt;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Errors from the channel boundary of a [`MessageWorker`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker thread is gone (it panicked or was shut down).
    #[error("worker thread is no longer running")]
    Disconnected,
    /// No response arrived within the requested wait.
    #[error("timed out waiting for worker response")]
    Timeout,
}

/// A single background thread serving requests of type `Req` with
/// responses of type `Resp`, in submission order.
///
/// # Example
///
/// ```
/// use pagemark_scheduler::MessageWorker;
///
/// let worker = MessageWorker::spawn("doubler", |n: u32| n * 2).unwrap();
/// worker.submit(21).unwrap();
/// assert_eq!(worker.recv().unwrap(), 42);
/// worker.shutdown();
/// ```
pub struct MessageWorker<Req, Resp> {
    name: String,
    requests: Option<Sender<Req>>,
    responses: Receiver<Resp>,
    thread: Option<JoinHandle<()>>,
}

impl<Req, Resp> MessageWorker<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Spawn the worker thread.
    ///
    /// The thread exits once every request sender is dropped (see
    /// [`MessageWorker::shutdown`]) or the response receiver goes away.
    pub fn spawn<F>(name: &str, mut handler: F) -> io::Result<Self>
    where
        F: FnMut(Req) -> Resp + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel::<Req>();
        let (response_tx, response_rx) = mpsc::channel::<Resp>();
        let thread_name = format!("pagemark-{name}");

        let thread = thread::Builder::new().name(thread_name.clone()).spawn(move || {
            for request in request_rx {
                let response = handler(request);
                if response_tx.send(response).is_err() {
                    break;
                }
            }
            debug!(worker = %thread::current().name().unwrap_or("worker"), "worker loop exited");
        })?;

        Ok(Self {
            name: thread_name,
            requests: Some(request_tx),
            responses: response_rx,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a request. Ownership of the payload moves to the worker.
    pub fn submit(&self, request: Req) -> Result<(), WorkerError> {
        let sender = self.requests.as_ref().ok_or(WorkerError::Disconnected)?;
        sender.send(request).map_err(|_| WorkerError::Disconnected)
    }

    /// Block until the next response arrives.
    pub fn recv(&self) -> Result<Resp, WorkerError> {
        self.responses.recv().map_err(|_| WorkerError::Disconnected)
    }

    /// Block for at most `timeout` waiting for the next response.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Resp, WorkerError> {
        self.responses.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => WorkerError::Timeout,
            RecvTimeoutError::Disconnected => WorkerError::Disconnected,
        })
    }

    /// Take a response if one is ready, without blocking.
    pub fn try_recv(&self) -> Result<Option<Resp>, WorkerError> {
        match self.responses.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Stop accepting requests and wait for queued ones to drain.
    pub fn shutdown(mut self) {
        self.stop();
    }
}

impl<Req, Resp> MessageWorker<Req, Resp> {
    fn stop(&mut self) {
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

impl<Req, Resp> Drop for MessageWorker<Req, Resp> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<Req, Resp> fmt::Debug for MessageWorker<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageWorker")
            .field("name", &self.name)
            .field("running", &self.thread.is_some())
            .finish()
    }
}
