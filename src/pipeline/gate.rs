use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::utils::CachePadded;

/// Single-slot admission control.
///
/// Admission happens on the capture thread and release on a worker, so the
/// flag is published with release ordering and observed with acquire ordering.
#[derive(Debug, Default)]
pub struct AdmissionGate {
    busy: CachePadded<AtomicBool>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot. Returns false, leaving the state untouched, if a frame
    /// is already admitted.
    pub fn try_admit(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Reopen the slot. Returns false if it was already idle.
    pub fn release(&self) -> bool {
        self.busy.swap(false, Ordering::AcqRel)
    }

    pub fn is_idle(&self) -> bool {
        !self.busy.load(Ordering::Acquire)
    }
}
