//! YUV 4:2:0 to packed ARGB8888 conversion

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::trace;

use crate::capture::{Frame, Plane};
use crate::latency::LatencyRecorder;

/// Largest value of a channel before the final shift down to 8 bits (2^18 - 1)
const MAX_CHANNEL_VALUE: i32 = 262_143;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("frame has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("{plane} plane has a zero stride")]
    ZeroStride { plane: &'static str },
    #[error("{plane} row stride {stride} is narrower than {needed} bytes")]
    NarrowStride {
        plane: &'static str,
        stride: usize,
        needed: usize,
    },
    #[error("{plane} plane holds {actual} bytes, strides require {needed}")]
    ShortPlane {
        plane: &'static str,
        needed: usize,
        actual: usize,
    },
}

/// Packed ARGB8888 pixels, row-major with no padding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Reshape in place, keeping the allocation when it is large enough
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels.resize(width as usize * height as usize, 0);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Drop alpha and emit tightly packed RGB bytes
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.pixels.len() * 3);
        for &p in &self.pixels {
            rgb.push((p >> 16) as u8); // R
            rgb.push((p >> 8) as u8); // G
            rgb.push(p as u8); // B
        }
        rgb
    }
}

/// Converts camera frames into a caller-owned [`PixelBuffer`], reporting the
/// time each conversion took.
pub struct Converter {
    recorder: Arc<dyn LatencyRecorder>,
}

impl Converter {
    pub fn new(recorder: Arc<dyn LatencyRecorder>) -> Self {
        Self { recorder }
    }

    /// Overwrite `out` with the ARGB rendition of `frame`.
    ///
    /// Both chroma planes are addressed with the first chroma plane's strides.
    pub fn convert(&self, frame: &Frame, out: &mut PixelBuffer) -> Result<(), ConvertError> {
        let start = Instant::now();
        let [y, u, v] = &frame.planes;
        convert_yuv420_to_argb8888(
            y,
            u,
            v,
            frame.width,
            frame.height,
            u.row_stride,
            u.pixel_stride,
            out,
        )?;

        let elapsed = start.elapsed();
        trace!(elapsed_us = elapsed.as_micros() as u64, "frame converted");
        metrics::histogram!("convert_time_ms").record(elapsed.as_secs_f64() * 1000.0);
        self.recorder.record(elapsed);
        Ok(())
    }
}

/// Convert YUV 4:2:0 planes to ARGB8888.
///
/// Chroma pixel strides of 1 (planar) and 2 (semi-planar) are both accepted.
#[allow(clippy::too_many_arguments)]
pub fn convert_yuv420_to_argb8888(
    y_plane: &Plane,
    u_plane: &Plane,
    v_plane: &Plane,
    width: u32,
    height: u32,
    uv_row_stride: usize,
    uv_pixel_stride: usize,
    out: &mut PixelBuffer,
) -> Result<(), ConvertError> {
    if width == 0 || height == 0 {
        return Err(ConvertError::Empty { width, height });
    }
    let w = width as usize;
    let h = height as usize;
    let y_stride = y_plane.row_stride;

    if y_stride == 0 {
        return Err(ConvertError::ZeroStride { plane: "luma" });
    }
    if uv_row_stride == 0 || uv_pixel_stride == 0 {
        return Err(ConvertError::ZeroStride { plane: "chroma" });
    }
    if y_stride < w {
        return Err(ConvertError::NarrowStride {
            plane: "luma",
            stride: y_stride,
            needed: w,
        });
    }
    let last_uv_col = ((w - 1) >> 1) * uv_pixel_stride;
    if uv_row_stride <= last_uv_col {
        return Err(ConvertError::NarrowStride {
            plane: "chroma",
            stride: uv_row_stride,
            needed: last_uv_col + 1,
        });
    }

    let y_needed = (h - 1) * y_stride + w;
    check_len("luma", &y_plane.data, y_needed)?;
    let uv_needed = ((h - 1) >> 1) * uv_row_stride + last_uv_col + 1;
    check_len("chroma-1", &u_plane.data, uv_needed)?;
    check_len("chroma-2", &v_plane.data, uv_needed)?;

    out.resize(width, height);
    let (y_data, u_data, v_data) = (&y_plane.data[..], &u_plane.data[..], &v_plane.data[..]);

    for (j, row) in out.pixels_mut().chunks_exact_mut(w).enumerate() {
        let p_y = y_stride * j;
        let p_uv = uv_row_stride * (j >> 1);

        for (i, px) in row.iter_mut().enumerate() {
            let uv_offset = p_uv + (i >> 1) * uv_pixel_stride;
            *px = yuv_to_argb(y_data[p_y + i], u_data[uv_offset], v_data[uv_offset]);
        }
    }

    Ok(())
}

fn check_len(plane: &'static str, data: &[u8], needed: usize) -> Result<(), ConvertError> {
    if data.len() < needed {
        return Err(ConvertError::ShortPlane {
            plane,
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}

/// BT.601 video-range YUV to ARGB in 10-bit fixed point
#[inline]
fn yuv_to_argb(y: u8, u: u8, v: u8) -> u32 {
    let y = (y as i32 - 16).max(0);
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let y1192 = 1192 * y;
    let r = (y1192 + 1634 * v).clamp(0, MAX_CHANNEL_VALUE);
    let g = (y1192 - 833 * v - 400 * u).clamp(0, MAX_CHANNEL_VALUE);
    let b = (y1192 + 2066 * u).clamp(0, MAX_CHANNEL_VALUE);

    0xff00_0000 | ((r << 6) as u32 & 0x00ff_0000) | ((g >> 2) as u32 & 0xff00) | ((b >> 10) as u32 & 0xff)
}
