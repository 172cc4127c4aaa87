//! Cooperative cancellation for exam attempts.
//!
//! A `CancelToken` is threaded through an attempt's call chain and
//! checked at each phase boundary. The `StuckDetector` flips it when the
//! agent keeps producing degenerate output, converting a wedged attempt
//! into an orderly failure instead of waiting on an external timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Marker string agent runtimes emit for turns with no text content.
const DEGENERATE_MARKER: &str = "[no text content]";

/// Raised when an operation observes a cancelled token.
#[derive(Debug, thiserror::Error)]
#[error("attempt was cancelled")]
pub struct Cancelled;

/// Shared cancellation flag; cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Errors when the token has been cancelled; for phase boundaries.
    pub fn ensure_active(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Counts degenerate agent turns; trips once the limit is exceeded.
#[derive(Debug)]
pub struct StuckDetector {
    degenerate_turns: u32,
    limit: u32,
}

impl StuckDetector {
    pub fn new(limit: u32) -> Self {
        Self {
            degenerate_turns: 0,
            limit,
        }
    }

    /// Observes one agent turn's output. Returns true when the attempt
    /// should be treated as stuck.
    pub fn observe(&mut self, output: &str) -> bool {
        if output.trim().is_empty() || output.contains(DEGENERATE_MARKER) {
            self.degenerate_turns += 1;
        }
        self.degenerate_turns > self.limit
    }
}
