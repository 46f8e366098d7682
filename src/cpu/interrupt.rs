//! External cancellation of a running machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared flag asking the engine to stop.
///
/// Raising the flag never interrupts an instruction midway; the engine
/// checks it once per cycle, before the next fetch.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Has cancellation been requested?
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
