use crate::capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Auto-detect a capture device offering a YUV 4:2:0 format
#[cfg(feature = "v4l2")]
pub async fn auto_detect_device() -> color_eyre::Result<FoundDevice> {
    use std::path::Path;

    use color_eyre::eyre::eyre;
    use tracing::info;
    use v4l::{capability::Flags, video::Capture, Device, FourCC};

    info!("Auto-detecting capture devices...");

    // Semi-planar first: most UVC and ISP drivers expose NV12 natively
    let preferred = [PixelFormat::Nv12, PixelFormat::Nv21, PixelFormat::Yu12];

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        for format in preferred {
            if formats
                .iter()
                .any(|fmt| fmt.fourcc == FourCC::new(&format.fourcc()))
            {
                info!("Found {:?} device: {} - {}", format, path, caps.card);
                return Ok(FoundDevice { path, format });
            }
        }
    }

    Err(eyre!("No suitable capture device found"))
}
