//! Single-slot frame offloading pipeline.
//!
//! The camera calls [`Pipeline::on_image_available`] for every capture. At most
//! one frame is admitted at a time; the rest are closed on the spot. An
//! admitted frame is handed to a Tokio task that converts, crops and offloads
//! it, then releases it so the next capture can be admitted.

pub mod gate;
pub mod lease;
pub mod stats;
pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace};

use crate::capture::Frame;
use crate::convert::Converter;
use crate::geometry::{FrameGeometry, GeometryError};
use crate::latency::{FileLatencyLog, LatencyRecorder, NoopRecorder};
use crate::offload::{OffloadOutcome, OffloadTransport};
use crate::tracker::{FrameInfo, NullTracker, Tracker};
use crate::Config;

pub use gate::AdmissionGate;
pub use lease::FrameLease;
pub use stats::{PipelineStats, StatsSnapshot};
pub use worker::{OffloadWorker, WorkerSettings};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid preview geometry: {0}")]
    Geometry(#[from] GeometryError),
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// What happened to a frame handed to [`Pipeline::on_image_available`]
#[derive(Debug)]
pub enum Admission {
    /// The frame is in flight; the task resolves once it has been released
    Admitted {
        frame_id: u64,
        task: JoinHandle<OffloadOutcome>,
    },
    /// Another frame was in flight, this one was closed
    Rejected,
    /// The camera had nothing to deliver
    Empty,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    pub fn frame_id(&self) -> Option<u64> {
        match self {
            Admission::Admitted { frame_id, .. } => Some(*frame_id),
            _ => None,
        }
    }

    /// Wait for an admitted frame's outcome
    pub async fn outcome(self) -> Option<OffloadOutcome> {
        match self {
            Admission::Admitted { task, .. } => task.await.ok(),
            _ => None,
        }
    }
}

pub struct Pipeline {
    gate: Arc<AdmissionGate>,
    next_frame_id: AtomicU64,
    geometry: FrameGeometry,
    tracker: Arc<dyn Tracker>,
    worker: Arc<OffloadWorker>,
    stats: Arc<PipelineStats>,
    runtime: Handle,
}

impl Pipeline {
    pub fn builder(config: Config, transport: Arc<dyn OffloadTransport>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            transport,
            tracker: None,
            convert_latency: None,
            round_trip_latency: None,
            runtime: None,
        }
    }

    /// Camera callback. Never blocks on I/O.
    pub fn on_image_available(&self, image: Option<Frame>) -> Admission {
        let Some(mut frame) = image else {
            return Admission::Empty;
        };

        if !self.gate.try_admit() {
            frame.close();
            self.stats.rejected();
            trace!("Frame in flight, capture dropped");
            return Admission::Rejected;
        }

        let frame_id = self.next_frame_id.fetch_add(1, Ordering::Relaxed);
        self.stats.admitted();
        let lease = FrameLease::new(frame_id, frame, self.gate.clone(), self.stats.clone());

        let frame = lease.frame();
        let info = FrameInfo {
            width: frame.width,
            height: frame.height,
            row_stride: frame.luma().row_stride,
            orientation: self.geometry.sensor_rotation,
            timestamp: frame.timestamp_ns,
        };
        self.tracker.on_frame(&info, &frame.luma().data);

        debug!(frame_id, "Frame admitted");
        let task = self.runtime.spawn(self.worker.clone().process(lease));

        Admission::Admitted { frame_id, task }
    }

    pub fn is_idle(&self) -> bool {
        self.gate.is_idle()
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

pub struct PipelineBuilder {
    config: Config,
    transport: Arc<dyn OffloadTransport>,
    tracker: Option<Arc<dyn Tracker>>,
    convert_latency: Option<Arc<dyn LatencyRecorder>>,
    round_trip_latency: Option<Arc<dyn LatencyRecorder>>,
    runtime: Option<Handle>,
}

impl PipelineBuilder {
    pub fn tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Overrides `latency.convert_log`
    pub fn convert_latency(mut self, recorder: Arc<dyn LatencyRecorder>) -> Self {
        self.convert_latency = Some(recorder);
        self
    }

    /// Overrides `latency.round_trip_log`
    pub fn round_trip_latency(mut self, recorder: Arc<dyn LatencyRecorder>) -> Self {
        self.round_trip_latency = Some(recorder);
        self
    }

    /// Runtime that runs the offload tasks; defaults to the current one
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let Config {
            capture,
            pipeline,
            offload,
            latency,
        } = self.config;

        let geometry = FrameGeometry::new(
            capture.width,
            capture.height,
            pipeline.crop_size,
            pipeline.sensor_rotation,
            pipeline.screen_orientation,
            pipeline.maintain_aspect,
        )?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };

        let convert_latency = self
            .convert_latency
            .unwrap_or_else(|| recorder_for(latency.convert_log));
        let round_trip_latency = self
            .round_trip_latency
            .unwrap_or_else(|| recorder_for(latency.round_trip_log));
        let tracker = self.tracker.unwrap_or_else(|| Arc::new(NullTracker));

        let settings = WorkerSettings {
            timeout: Duration::from_millis(offload.timeout_ms),
            payload_format: offload.payload_format,
            jpeg_quality: offload.jpeg_quality,
            min_confidence: pipeline.min_confidence,
        };

        let stats = Arc::new(PipelineStats::new());
        let worker = OffloadWorker::new(
            Converter::new(convert_latency),
            geometry,
            self.transport,
            tracker.clone(),
            round_trip_latency,
            stats.clone(),
            settings,
        );

        info!(
            crop_size = geometry.crop_size,
            timeout_ms = offload.timeout_ms,
            "Pipeline ready"
        );

        Ok(Pipeline {
            gate: Arc::new(AdmissionGate::new()),
            next_frame_id: AtomicU64::new(1),
            geometry,
            tracker,
            worker: Arc::new(worker),
            stats,
            runtime,
        })
    }
}

fn recorder_for(path: Option<std::path::PathBuf>) -> Arc<dyn LatencyRecorder> {
    match path {
        Some(path) => Arc::new(FileLatencyLog::new(path)),
        None => Arc::new(NoopRecorder),
    }
}
