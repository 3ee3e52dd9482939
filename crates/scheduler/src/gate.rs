//! Per-page render gating.
//!
//! Every page view owns a slot holding a visibility flag, a generation
//! counter and the cancellation token of its in-flight render/OCR task.
//! Work may only start for a visible page, and a result is only applied
//! while the ticket it was started with is still current.

use crate::CancellationToken;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// 1-based page number.
pub type PageNumber = u32;

/// Handle given to a render or OCR task for one page.
///
/// The ticket records the generation it was issued at; any later
/// invalidation of the page makes it stale.
#[derive(Debug, Clone)]
pub struct RenderTicket {
    page: PageNumber,
    generation: u64,
    token: CancellationToken,
}

impl RenderTicket {
    pub fn page(&self) -> PageNumber {
        self.page
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct PageSlot {
    visible: bool,
    generation: u64,
    token: CancellationToken,
}

impl PageSlot {
    /// Cancel the outstanding task and move to a new generation.
    fn supersede(&mut self) {
        self.token.cancel();
        self.token = CancellationToken::new();
        self.generation += 1;
    }
}

/// Visibility and generation bookkeeping for every page of a document view.
///
/// Slots are never removed, so a generation number is never reused for a
/// page within the lifetime of the gate.
///
/// # Example
///
/// ```
/// use pagemark_scheduler::RenderGate;
///
/// let gate = RenderGate::new();
/// assert!(gate.begin(1).is_none()); // not visible yet
///
/// gate.set_visible(1, true);
/// let ticket = gate.begin(1).expect("visible page should get a ticket");
/// assert!(gate.is_current(&ticket));
///
/// gate.invalidate(1); // e.g. zoom changed
/// assert!(!gate.is_current(&ticket));
/// assert!(ticket.is_cancelled());
/// ```
#[derive(Debug, Default)]
pub struct RenderGate {
    pages: Mutex<HashMap<PageNumber, PageSlot>>,
}

impl RenderGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slot<R>(&self, page: PageNumber, f: impl FnOnce(&mut PageSlot) -> R) -> R {
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        f(pages.entry(page).or_default())
    }

    /// Record a visibility change for a page.
    ///
    /// Hiding a page cancels its outstanding task.
    pub fn set_visible(&self, page: PageNumber, visible: bool) {
        self.with_slot(page, |slot| {
            if slot.visible && !visible {
                slot.supersede();
                debug!(page, generation = slot.generation, "page hidden, task cancelled");
            }
            slot.visible = visible;
        });
    }

    pub fn is_visible(&self, page: PageNumber) -> bool {
        self.with_slot(page, |slot| slot.visible)
    }

    /// Start a render/OCR task for a page.
    ///
    /// Returns `None` when the page is not visible. Any task already in
    /// flight for the page is cancelled; the new ticket supersedes it.
    pub fn begin(&self, page: PageNumber) -> Option<RenderTicket> {
        self.with_slot(page, |slot| {
            if !slot.visible {
                return None;
            }
            slot.supersede();
            Some(RenderTicket {
                page,
                generation: slot.generation,
                token: slot.token.clone(),
            })
        })
    }

    /// Cancel outstanding work for a page and advance its generation.
    ///
    /// Called on scale changes. Returns the new generation.
    pub fn invalidate(&self, page: PageNumber) -> u64 {
        self.with_slot(page, |slot| {
            slot.supersede();
            debug!(page, generation = slot.generation, "page invalidated");
            slot.generation
        })
    }

    /// Invalidate every known page, e.g. after a document-wide zoom.
    pub fn invalidate_all(&self) {
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in pages.values_mut() {
            slot.supersede();
        }
    }

    /// The page view was torn down.
    pub fn unmount(&self, page: PageNumber) {
        self.with_slot(page, |slot| {
            slot.supersede();
            slot.visible = false;
        });
    }

    pub fn generation(&self, page: PageNumber) -> u64 {
        self.with_slot(page, |slot| slot.generation)
    }

    /// Whether a result produced under `ticket` may still be applied.
    pub fn is_current(&self, ticket: &RenderTicket) -> bool {
        self.with_slot(ticket.page, |slot| {
            slot.visible && slot.generation == ticket.generation && !ticket.is_cancelled()
        })
    }
}
