use std::sync::Arc;

use tracing::debug;

use super::gate::AdmissionGate;
use super::stats::PipelineStats;
use crate::capture::Frame;

/// An admitted frame together with its claim on the [`AdmissionGate`].
///
/// Releasing closes the frame's native handle and then reopens the gate. It
/// happens at most once, and dropping an unreleased lease releases it, so every
/// exit path of the offload task (including a panic) frees the slot.
pub struct FrameLease {
    frame_id: u64,
    frame: Frame,
    gate: Arc<AdmissionGate>,
    stats: Arc<PipelineStats>,
    released: bool,
}

impl FrameLease {
    pub(crate) fn new(
        frame_id: u64,
        frame: Frame,
        gate: Arc<AdmissionGate>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            frame_id,
            frame,
            gate,
            stats,
            released: false,
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Close the frame and reopen the gate. Returns false on repeated calls.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.frame.close();
        self.gate.release();
        self.stats.released();
        debug!(frame_id = self.frame_id, "Frame released, gate open");
        true
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if self.release() {
            debug!(frame_id = self.frame_id, "Frame released on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::capture::{FrameHandle, PixelFormat};

    struct CountingHandle(Arc<AtomicUsize>);

    impl FrameHandle for CountingHandle {
        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn admitted(gate: &Arc<AdmissionGate>, closes: &Arc<AtomicUsize>) -> FrameLease {
        assert!(gate.try_admit());
        let frame = Frame::from_packed(PixelFormat::Yu12, 2, 2, 2, Bytes::from(vec![0; 6]), 0)
            .unwrap()
            .with_handle(CountingHandle(closes.clone()));
        FrameLease::new(7, frame, gate.clone(), Arc::new(PipelineStats::new()))
    }

    #[test]
    fn release_is_idempotent() {
        let gate = Arc::new(AdmissionGate::new());
        let closes = Arc::new(AtomicUsize::new(0));
        let mut lease = admitted(&gate, &closes);

        assert!(lease.release());
        assert!(gate.is_idle());
        // The gate was re-admitted by someone else; a stale release must not free it
        assert!(gate.try_admit());
        assert!(!lease.release());
        drop(lease);

        assert!(!gate.is_idle());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases() {
        let gate = Arc::new(AdmissionGate::new());
        let closes = Arc::new(AtomicUsize::new(0));
        drop(admitted(&gate, &closes));

        assert!(gate.is_idle());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_while_holding_a_lease_releases() {
        let gate = Arc::new(AdmissionGate::new());
        let closes = Arc::new(AtomicUsize::new(0));
        let lease = admitted(&gate, &closes);

        let result = std::thread::spawn(move || {
            let _lease = lease;
            panic!("offload blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(gate.is_idle());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
