//! Pagemark Scheduler Library
//!
//! Concurrency primitives shared by the page view and its background work:
//!
//! - [`CancellationToken`] for cooperative cancellation of a render or OCR task.
//! - [`RenderGate`] tracking per-page visibility and a generation counter, so
//!   that late results from a superseded render are rejected.
//! - [`MessageWorker`], a named background thread fed by message passing, used
//!   for OCR and for burning annotations into document bytes.
//!
//! # Example
//!
//! ```
//! use pagemark_scheduler::{MessageWorker, RenderGate};
//!
//! let gate = RenderGate::new();
//! gate.set_visible(1, true);
//! let ticket = gate.begin(1).expect("page 1 is visible");
//!
//! let worker = MessageWorker::spawn("ocr", move |page: u32| page * 10).unwrap();
//! worker.submit(ticket.page()).unwrap();
//! let result = worker.recv().unwrap();
//!
//! if gate.is_current(&ticket) {
//!     assert_eq!(result, 10);
//! }
//! ```

mod cancel;
mod gate;
mod worker;

pub use cancel::CancellationToken;
pub use gate::{PageNumber, RenderGate, RenderTicket};
pub use worker::{MessageWorker, WorkerError};
