//! Cooperative cancellation shared between a batch handle and its workers.
//!
//! Cancellation never interrupts a render or an encode that is already
//! running. Workers poll [`CancellationToken::is_cancelled`] between page
//! operations and stop at the next boundary, so every file already written
//! stays intact.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable one-way flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
