//! Single-slot cache of idle signals.
//!
//! Each queue policy keeps one [`SignalPool`]. Under sustained load a waiter
//! that has just observed its result hands its signal back here, and the next
//! enqueue picks it up instead of allocating. Only one idle signal is kept;
//! a signal displaced by a newer one is simply dropped.

use std::sync::Arc;

use crate::signal::ResettableSignal;

#[derive(Debug, Default)]
pub struct SignalPool {
    idle: Option<Arc<ResettableSignal>>,
    allocated: u64,
}

impl SignalPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the cached signal, or allocate a fresh one.
    pub fn acquire(&mut self) -> Arc<ResettableSignal> {
        match self.idle.take() {
            Some(signal) => signal,
            None => {
                self.allocated += 1;
                ResettableSignal::new()
            }
        }
    }

    /// Cache `signal` for the next [`acquire`](Self::acquire), replacing any
    /// signal already cached.
    ///
    /// The signal's occupancy must already have been observed or abandoned.
    pub fn release(&mut self, signal: Arc<ResettableSignal>) {
        if !signal.is_idle() {
            debug_assert!(false, "released a signal with a live occupancy");
            tracing::error!(
                version = signal.version(),
                "Bug: signal released to pool before its result was observed - discarding"
            );
            return;
        }
        self.idle = Some(signal);
    }

    pub fn has_idle(&self) -> bool {
        self.idle.is_some()
    }

    /// Number of signals this pool has had to allocate.
    pub fn allocated(&self) -> u64 {
        self.allocated
    }
}
