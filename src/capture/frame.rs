use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packed YUV 4:2:0 layouts a camera source can hand us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Three planes: Y, then U, then V (I420)
    Yu12,
    /// Y plane followed by interleaved U/V
    Nv12,
    /// Y plane followed by interleaved V/U
    Nv21,
}

impl PixelFormat {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Yu12 => *b"YU12",
            PixelFormat::Nv12 => *b"NV12",
            PixelFormat::Nv21 => *b"NV21",
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },
    #[error("invalid frame geometry {width}x{height} (stride {stride})")]
    InvalidGeometry { width: u32, height: u32, stride: usize },
}

/// One image plane with its row and pixel strides
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Bytes, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }
}

/// Native resource backing a frame (driver buffer, reader slot, ...)
pub trait FrameHandle: Send {
    fn close(&mut self);
}

/// One camera capture: three YUV 4:2:0 planes plus timing metadata.
///
/// The native handle is closed exactly once, either by [`Frame::close`] or when
/// the frame is dropped.
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Luma, chroma-1 (U), chroma-2 (V)
    pub planes: [Plane; 3],
    /// Sensor timestamp in nanoseconds
    pub timestamp_ns: u64,
    /// Host time at capture, for latency tracking
    pub captured_at: Instant,
    handle: Option<Box<dyn FrameHandle>>,
}

impl Frame {
    pub fn new(width: u32, height: u32, planes: [Plane; 3], timestamp_ns: u64) -> Self {
        Self {
            width,
            height,
            planes,
            timestamp_ns,
            captured_at: Instant::now(),
            handle: None,
        }
    }

    /// Attach the native handle that must be closed when the frame is done
    pub fn with_handle(mut self, handle: impl FrameHandle + 'static) -> Self {
        self.handle = Some(Box::new(handle));
        self
    }

    /// Split a single contiguous buffer into planes.
    ///
    /// `stride` is the luma row stride in bytes; chroma strides follow from the
    /// layout (half for YU12, full for the semi-planar formats).
    pub fn from_packed(
        format: PixelFormat,
        width: u32,
        height: u32,
        stride: usize,
        data: Bytes,
        timestamp_ns: u64,
    ) -> Result<Self, CaptureError> {
        if width == 0 || height == 0 || stride < width as usize {
            return Err(CaptureError::InvalidGeometry {
                width,
                height,
                stride,
            });
        }

        let rows = height as usize;
        let chroma_rows = rows.div_ceil(2);
        let luma_len = stride * rows;

        let planes = match format {
            PixelFormat::Yu12 => {
                let chroma_stride = stride.div_ceil(2);
                let chroma_len = chroma_stride * chroma_rows;
                let expected = luma_len + 2 * chroma_len;
                if data.len() < expected {
                    return Err(CaptureError::ShortBuffer {
                        expected,
                        actual: data.len(),
                    });
                }
                [
                    Plane::new(data.slice(..luma_len), stride, 1),
                    Plane::new(data.slice(luma_len..luma_len + chroma_len), chroma_stride, 1),
                    Plane::new(
                        data.slice(luma_len + chroma_len..expected),
                        chroma_stride,
                        1,
                    ),
                ]
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                let chroma_stride = stride + stride % 2;
                let expected = luma_len + chroma_stride * chroma_rows;
                if data.len() < expected {
                    return Err(CaptureError::ShortBuffer {
                        expected,
                        actual: data.len(),
                    });
                }
                let interleaved = data.slice(luma_len..expected);
                let first = Plane::new(interleaved.clone(), chroma_stride, 2);
                let second = Plane::new(interleaved.slice(1..), chroma_stride, 2);
                let (u, v) = if format == PixelFormat::Nv12 {
                    (first, second)
                } else {
                    (second, first)
                };
                [Plane::new(data.slice(..luma_len), stride, 1), u, v]
            }
        };

        Ok(Self::new(width, height, planes, timestamp_ns))
    }

    pub fn luma(&self) -> &Plane {
        &self.planes[0]
    }

    /// A view sharing this frame's plane storage but not its native handle
    pub fn detached(&self) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            planes: self.planes.clone(),
            timestamp_ns: self.timestamp_ns,
            captured_at: self.captured_at,
            handle: None,
        }
    }

    /// Close the native handle. Returns false if it was already closed.
    pub fn close(&mut self) -> bool {
        match self.handle.take() {
            Some(mut handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ns", &self.timestamp_ns)
            .field("open", &self.handle.is_some())
            .finish()
    }
}
