use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::lease::FrameLease;
use super::stats::PipelineStats;
use crate::capture::Frame;
use crate::convert::{Converter, PixelBuffer};
use crate::geometry::{warp_into, FrameGeometry};
use crate::latency::LatencyRecorder;
use crate::offload::protocol::encode_payload;
use crate::offload::{
    Detection, OffloadError, OffloadOutcome, OffloadRequest, OffloadTransport, PayloadFormat,
};
use crate::tracker::Tracker;

/// Knobs fixed at setup
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Upper bound on one network round trip. The clock starts once the
    /// payload is encoded, so conversion and encoding are not counted.
    pub timeout: Duration,
    pub payload_format: PayloadFormat,
    pub jpeg_quality: u8,
    /// Detections below this confidence are not passed on
    pub min_confidence: f32,
}

/// Buffers reused from frame to frame. Only the in-flight frame touches them.
struct Scratch {
    rgb: PixelBuffer,
    crop: PixelBuffer,
    luma: Vec<u8>,
}

/// Runs admitted frames through convert → crop → encode → round trip.
pub struct OffloadWorker {
    converter: Converter,
    geometry: FrameGeometry,
    scratch: Mutex<Scratch>,
    transport: Arc<dyn OffloadTransport>,
    tracker: Arc<dyn Tracker>,
    round_trip_latency: Arc<dyn LatencyRecorder>,
    stats: Arc<PipelineStats>,
    settings: WorkerSettings,
}

impl OffloadWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        converter: Converter,
        geometry: FrameGeometry,
        transport: Arc<dyn OffloadTransport>,
        tracker: Arc<dyn Tracker>,
        round_trip_latency: Arc<dyn LatencyRecorder>,
        stats: Arc<PipelineStats>,
        settings: WorkerSettings,
    ) -> Self {
        let scratch = Scratch {
            rgb: PixelBuffer::new(geometry.preview_width, geometry.preview_height),
            crop: PixelBuffer::new(geometry.crop_size, geometry.crop_size),
            luma: Vec::new(),
        };
        Self {
            converter,
            geometry,
            scratch: Mutex::new(scratch),
            transport,
            tracker,
            round_trip_latency,
            stats,
            settings,
        }
    }

    /// Offload one admitted frame, then release it.
    ///
    /// The lease is released before this returns whatever the outcome; a panic
    /// releases it while unwinding.
    ///
    /// The reported latency covers only the transport round trip, from handing
    /// over the encoded request until the response arrives. Conversion has its
    /// own recorder. Failed and timed-out round trips record nothing.
    pub async fn process(self: Arc<Self>, mut lease: FrameLease) -> OffloadOutcome {
        let frame_id = lease.frame_id();
        let frame = lease.frame().detached();

        let outcome = match self.offload(frame_id, frame).await {
            Ok((latency, detections)) => OffloadOutcome::Success {
                latency,
                detections,
            },
            Err(e) => OffloadOutcome::Failure(e),
        };

        match &outcome {
            OffloadOutcome::Success {
                latency,
                detections,
            } => {
                self.stats.offload_succeeded();
                info!(
                    frame_id,
                    latency_ms = latency.as_millis() as u64,
                    detections = detections.len(),
                    "Offload complete"
                );
            }
            OffloadOutcome::Failure(e) if e.is_local() => {
                self.stats.offload_failed();
                error!(frame_id, "Frame dropped before offload: {}", e);
            }
            OffloadOutcome::Failure(e) => {
                self.stats.offload_failed();
                warn!(frame_id, "Offload failed: {}", e);
            }
        }

        lease.release();
        outcome
    }

    async fn offload(
        self: &Arc<Self>,
        frame_id: u64,
        frame: Frame,
    ) -> Result<(Duration, Vec<Detection>), OffloadError> {
        let timestamp = frame.timestamp_ns;

        let worker = Arc::clone(self);
        let payload = tokio::task::spawn_blocking(move || worker.prepare(&frame))
            .await
            .map_err(|e| OffloadError::Aborted(e.to_string()))??;

        let request = OffloadRequest {
            frame_id,
            width: self.geometry.crop_size,
            height: self.geometry.crop_size,
            format: self.settings.payload_format,
            payload,
        };

        let start = Instant::now();
        let response = tokio::time::timeout(self.settings.timeout, self.transport.round_trip(request))
            .await
            .map_err(|_| OffloadError::Timeout(self.settings.timeout))??;
        let latency = start.elapsed();

        debug!(frame_id, latency_ms = latency.as_millis() as u64, "Total latency");
        metrics::histogram!("offload_round_trip_ms").record(latency.as_secs_f64() * 1000.0);
        self.round_trip_latency.record(latency);

        let detections = self.to_frame_space(response.detections);
        {
            let scratch = self.lock_scratch();
            self.tracker
                .track_results(&detections, &scratch.luma, timestamp);
        }

        Ok((latency, detections))
    }

    /// Convert, crop and encode. Runs on the blocking pool.
    fn prepare(&self, frame: &Frame) -> Result<Vec<u8>, OffloadError> {
        let geometry = &self.geometry;
        if frame.width != geometry.preview_width || frame.height != geometry.preview_height {
            return Err(OffloadError::UnexpectedSize {
                width: frame.width,
                height: frame.height,
                expected_width: geometry.preview_width,
                expected_height: geometry.preview_height,
            });
        }

        let mut scratch = self.lock_scratch();
        let Scratch { rgb, crop, luma } = &mut *scratch;

        self.converter.convert(frame, rgb)?;

        luma.clear();
        luma.extend_from_slice(&frame.luma().data);

        warp_into(rgb, &geometry.crop_to_frame, crop);

        let payload = encode_payload(
            crop,
            self.settings.payload_format,
            self.settings.jpeg_quality,
        )?;
        Ok(payload)
    }

    fn to_frame_space(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|d| d.confidence >= self.settings.min_confidence)
            .map(|mut d| {
                d.location = self.geometry.crop_to_frame.map_rect(&d.location);
                d
            })
            .collect()
    }

    fn lock_scratch(&self) -> MutexGuard<'_, Scratch> {
        self.scratch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
