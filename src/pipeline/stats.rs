use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

/// Pipeline counters shared between the capture thread and workers
#[derive(Debug, Default)]
pub struct PipelineStats {
    counters: CachePadded<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    frames_admitted: AtomicU64,
    frames_rejected: AtomicU64,
    frames_released: AtomicU64,
    offload_success: AtomicU64,
    offload_failure: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_admitted: u64,
    pub frames_rejected: u64,
    pub frames_released: u64,
    pub offload_success: u64,
    pub offload_failure: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn admitted(&self) {
        self.counters.frames_admitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_admitted").increment(1);
    }

    pub(crate) fn rejected(&self) {
        self.counters.frames_rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_rejected").increment(1);
    }

    pub(crate) fn released(&self) {
        self.counters.frames_released.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_released").increment(1);
    }

    pub(crate) fn offload_succeeded(&self) {
        self.counters.offload_success.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("offload_success").increment(1);
    }

    pub(crate) fn offload_failed(&self) {
        self.counters.offload_failure.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("offload_failure").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_admitted: self.counters.frames_admitted.load(Ordering::Relaxed),
            frames_rejected: self.counters.frames_rejected.load(Ordering::Relaxed),
            frames_released: self.counters.frames_released.load(Ordering::Relaxed),
            offload_success: self.counters.offload_success.load(Ordering::Relaxed),
            offload_failure: self.counters.offload_failure.load(Ordering::Relaxed),
        }
    }
}
