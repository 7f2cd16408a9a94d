//! Interface to the object tracker that smooths detections across frames.

use tracing::trace;

use crate::offload::Detection;

/// Per-frame metadata handed to the tracker alongside the luma plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
    /// Sensor mounting angle, in degrees
    pub orientation: i32,
    pub timestamp: u64,
}

pub trait Tracker: Send + Sync {
    /// Called on the capture thread for every admitted frame
    fn on_frame(&self, info: &FrameInfo, luma: &[u8]);

    /// Called from the offload worker with detections already in frame space
    fn track_results(&self, detections: &[Detection], luma: &[u8], timestamp: u64);
}

/// Tracker that only traces what it is given
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl Tracker for NullTracker {
    fn on_frame(&self, info: &FrameInfo, _luma: &[u8]) {
        trace!(timestamp = info.timestamp, "tracker frame");
    }

    fn track_results(&self, detections: &[Detection], _luma: &[u8], timestamp: u64) {
        trace!(timestamp, count = detections.len(), "tracker results");
    }
}
