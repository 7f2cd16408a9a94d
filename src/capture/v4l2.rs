//! V4L2 camera source producing YUV 4:2:0 frames

use std::time::Duration;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
    capture::frame::Frame,
    CaptureConfig,
};

/// Memory-mapped V4L2 capture
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    stride: usize,
}

impl V4l2Capture {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        info!("Initializing V4L2 capture: {:?}", config.device);

        let device = Device::with_path(&config.device.path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(&config.format.fourcc());

        let fmt = device.set_format(&fmt)?;
        if fmt.fourcc != FourCC::new(&config.format.fourcc()) {
            return Err(eyre!(
                "Device refused {:?}, offered {}",
                config.format,
                fmt.fourcc
            ));
        }

        // The driver may round the size; frames must match the preview geometry
        if fmt.width != config.width || fmt.height != config.height {
            return Err(eyre!(
                "Device negotiated {}x{}, expected {}x{}",
                fmt.width,
                fmt.height,
                config.width,
                config.height
            ));
        }

        let stride = (fmt.stride as usize).max(fmt.width as usize);

        Ok(Self {
            device: Box::new(device),
            stream: None,
            config,
            stride,
        })
    }

    pub fn start_stream(&mut self) -> Result<()> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)?;

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    /// Dequeue the next frame. Blocks until the driver delivers one.
    #[instrument(skip(self))]
    pub fn capture_frame(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| eyre!("Stream not started"))?;

        let (buf, meta) = stream.next()?;

        // The mmap slot is re-queued on the next dequeue, so the planes get their own copy
        let data = Bytes::copy_from_slice(buf);
        let timestamp = Duration::from_secs(meta.timestamp.sec as u64)
            + Duration::from_micros(meta.timestamp.usec as u64);

        let frame = Frame::from_packed(
            self.config.format,
            self.config.width,
            self.config.height,
            self.stride,
            data,
            timestamp.as_nanos() as u64,
        )?;

        Ok(frame)
    }
}
