//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use offload::capture::{Frame, FrameHandle, PixelFormat};
use offload::latency::LatencyRecorder;
use offload::offload::{
    Detection, OffloadError, OffloadRequest, OffloadResponse, OffloadTransport, PayloadFormat,
};
use offload::tracker::{FrameInfo, Tracker};
use offload::Config;

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;
pub const CROP: u32 = 32;

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offload=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Small preview so conversion stays cheap
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.capture.width = WIDTH;
    config.capture.height = HEIGHT;
    config.capture.format = PixelFormat::Nv12;
    config.pipeline.crop_size = CROP;
    config.pipeline.sensor_rotation = 90;
    config.pipeline.screen_orientation = 0;
    config.offload.timeout_ms = 1_000;
    config.offload.payload_format = PayloadFormat::Rgb;
    config.latency = Default::default();
    config
}

/// Counts how many times frames were closed
#[derive(Clone, Default)]
pub struct CloseCounter(Arc<AtomicUsize>);

impl CloseCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> impl FrameHandle + 'static {
        CountingHandle(self.0.clone())
    }
}

struct CountingHandle(Arc<AtomicUsize>);

impl FrameHandle for CountingHandle {
    fn close(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A gradient NV12 capture
pub fn nv12_bytes(width: u32, height: u32) -> Bytes {
    let (w, h) = (width as usize, height as usize);
    let mut data = Vec::with_capacity(w * h * 3 / 2);
    for y in 0..h {
        for x in 0..w {
            data.push((16 + (x * 3 + y * 2) % 220) as u8);
        }
    }
    for i in 0..(w * h / 2) {
        data.push((64 + i % 128) as u8);
    }
    Bytes::from(data)
}

pub fn frame(data: &Bytes, timestamp_ns: u64, closes: &CloseCounter) -> Frame {
    Frame::from_packed(PixelFormat::Nv12, WIDTH, HEIGHT, WIDTH as usize, data.clone(), timestamp_ns)
        .unwrap()
        .with_handle(closes.handle())
}

/// What a [`MockTransport`] does with a given request
#[derive(Clone)]
pub enum Reply {
    Respond(Vec<Detection>),
    Fail,
    Hang,
    Panic,
}

/// In-process stand-in for the inference server
pub struct MockTransport {
    delay: Duration,
    script: Box<dyn Fn(u64) -> Reply + Send + Sync>,
    pub requests: Mutex<Vec<OffloadRequest>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new(delay: Duration, script: impl Fn(u64) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            delay,
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn ok(delay: Duration) -> Self {
        Self::new(delay, |_| Reply::Respond(Vec::new()))
    }

    pub fn request_ids(&self) -> Vec<u64> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.frame_id)
            .collect()
    }
}

#[async_trait]
impl OffloadTransport for MockTransport {
    async fn round_trip(&self, request: OffloadRequest) -> Result<OffloadResponse, OffloadError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let frame_id = request.frame_id;
        self.requests.lock().unwrap().push(request);
        let reply = (self.script)(frame_id);

        tokio::time::sleep(self.delay).await;
        if matches!(reply, Reply::Hang) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Reply::Respond(detections) => Ok(OffloadResponse {
                frame_id,
                detections,
            }),
            Reply::Fail => Err(OffloadError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))),
            Reply::Hang => Err(OffloadError::Closed),
            Reply::Panic => panic!("transport exploded on frame {}", frame_id),
        }
    }
}

/// Keeps samples in memory instead of writing them
#[derive(Default)]
pub struct CountingRecorder(Mutex<Vec<Duration>>);

impl CountingRecorder {
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn samples(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }
}

impl LatencyRecorder for CountingRecorder {
    fn record(&self, elapsed: Duration) {
        self.0.lock().unwrap().push(elapsed);
    }
}

/// Keeps everything the pipeline tells the tracker
#[derive(Default)]
pub struct RecordingTracker {
    pub frames: Mutex<Vec<FrameInfo>>,
    pub results: Mutex<Vec<(Vec<Detection>, usize, u64)>>,
}

impl Tracker for RecordingTracker {
    fn on_frame(&self, info: &FrameInfo, _luma: &[u8]) {
        self.frames.lock().unwrap().push(*info);
    }

    fn track_results(&self, detections: &[Detection], luma: &[u8], timestamp: u64) {
        self.results
            .lock()
            .unwrap()
            .push((detections.to_vec(), luma.len(), timestamp));
    }
}
