pub mod capture;
pub mod convert;
pub mod geometry;
pub mod latency;
pub mod offload;
pub mod pipeline;
pub mod tracker;
pub mod utils;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use offload::PayloadFormat;
use serde::{Deserialize, Serialize};

use crate::utils::FoundDevice;

pub use capture::Frame;
pub use pipeline::{Admission, Pipeline};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix of environment overrides, e.g. `OFFLOAD_OFFLOAD__SERVER_ADDR`
pub const ENV_PREFIX: &str = "OFFLOAD";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub offload: OffloadConfig,
    pub latency: LatencyConfig,
}

/// Camera source; `width` x `height` is also the preview size the crop
/// geometry is computed for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Side of the square crop sent to the server
    pub crop_size: u32,
    pub maintain_aspect: bool,
    pub min_confidence: f32,
    /// Sensor orientation in degrees
    pub sensor_rotation: i32,
    /// Screen orientation in degrees
    pub screen_orientation: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadConfig {
    pub server_addr: String,
    pub connect_timeout_ms: u64,
    /// Bound on one request/response round trip
    pub timeout_ms: u64,
    pub payload_format: PayloadFormat,
    pub jpeg_quality: u8,
}

/// Latency sample files; `None` disables a log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyConfig {
    pub convert_log: Option<PathBuf>,
    pub round_trip_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: FoundDevice::new("/dev/video0".into(), PixelFormat::Nv12),
                width: 800,
                height: 600,
                fps: 30,
                format: PixelFormat::Nv12,
                buffer_count: 4,
            },
            pipeline: PipelineConfig {
                crop_size: 608,
                maintain_aspect: false,
                min_confidence: 0.5,
                sensor_rotation: 90,
                screen_orientation: 0,
            },
            offload: OffloadConfig {
                server_addr: "127.0.0.1:9999".into(),
                connect_timeout_ms: 1_000,
                timeout_ms: 2_000,
                payload_format: PayloadFormat::Jpeg,
                jpeg_quality: 90,
            },
            latency: LatencyConfig::default(),
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `OFFLOAD_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let loaded: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let fail = |msg: &str| Err(config::ConfigError::Message(msg.to_string()));

        if self.pipeline.crop_size == 0 {
            return fail("pipeline.crop_size must be positive");
        }
        if !(0.0..=1.0).contains(&self.pipeline.min_confidence) {
            return fail("pipeline.min_confidence must be within 0..=1");
        }
        let angles = -360..=360;
        if !angles.contains(&self.pipeline.sensor_rotation)
            || !angles.contains(&self.pipeline.screen_orientation)
        {
            return fail("pipeline rotations must be within -360..=360 degrees");
        }
        if self.offload.timeout_ms == 0 || self.offload.connect_timeout_ms == 0 {
            return fail("offload timeouts must be positive");
        }
        if !(1..=100).contains(&self.offload.jpeg_quality) {
            return fail("offload.jpeg_quality must be within 1..=100");
        }
        Ok(())
    }
}
