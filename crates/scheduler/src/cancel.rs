//! Cooperative cancellation for page render and OCR tasks.
//!
//! A token is shared between the thread that owns a page view and the
//! worker doing the page's render/OCR. The owner cancels; the worker polls
//! `is_cancelled()` between units of work and stops early.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token for cooperative task cancellation.
///
/// Clones share the same underlying flag.
///
/// # Example
///
/// ```
/// use pagemark_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state.
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once `cancel()` has been called on this token or any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns `true` when both handles observe the same flag.
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancellation_token_basic() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_clone() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();
        assert!(token2.is_cancelled());
        assert!(token1.same_as(&token2));
    }

    #[test]
    fn test_cancellation_token_idempotent() {
        let token = CancellationToken::new();

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_independent_tokens_do_not_share_state() {
        let token1 = CancellationToken::new();
        let token2 = CancellationToken::default();

        token1.cancel();
        assert!(!token2.is_cancelled());
        assert!(!token1.same_as(&token2));
    }

    #[test]
    fn test_cancellation_visible_across_threads() {
        let token = CancellationToken::new();
        let worker_token = token.clone();

        let handle = thread::spawn(move || {
            while !worker_token.is_cancelled() {
                thread::yield_now();
            }
            true
        });

        token.cancel();
        assert!(handle.join().expect("worker thread should not panic"));
    }
}
