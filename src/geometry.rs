//! Frame to crop geometry.
//!
//! Transforms are 3x3 affine matrices acting on column vectors `(x, y, 1)`.
//! Rotations are clockwise in image coordinates (y grows downwards).

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::convert::PixelBuffer;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("degenerate transform: {src_w}x{src_h} -> {dst_w}x{dst_h}")]
    Degenerate {
        src_w: u32,
        src_h: u32,
        dst_w: u32,
        dst_h: u32,
    },
    #[error("transform is not invertible")]
    Singular,
    #[error("rotation {sensor} - {screen} degrees is out of range")]
    Rotation { sensor: i32, screen: i32 },
}

/// Axis-aligned rectangle, `left <= right` and `top <= bottom`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform(Matrix3<f64>);

impl Transform {
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Apply `other` after `self`
    fn then(self, other: Matrix3<f64>) -> Self {
        Self(other * self.0)
    }

    fn then_translate(self, dx: f64, dy: f64) -> Self {
        self.then(Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0))
    }

    fn then_scale(self, sx: f64, sy: f64) -> Self {
        self.then(Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0))
    }

    fn then_rotate(self, degrees: i32) -> Self {
        let (sin, cos) = match degrees.rem_euclid(360) {
            0 => (0.0, 1.0),
            90 => (1.0, 0.0),
            180 => (0.0, -1.0),
            270 => (-1.0, 0.0),
            _ => (degrees as f64).to_radians().sin_cos(),
        };
        self.then(Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0))
    }

    pub fn map_point(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.0 * Vector3::new(x, y, 1.0);
        (p.x / p.z, p.y / p.z)
    }

    /// Bounding box of the four mapped corners
    pub fn map_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.map_point(rect.left as f64, rect.top as f64),
            self.map_point(rect.right as f64, rect.top as f64),
            self.map_point(rect.right as f64, rect.bottom as f64),
            self.map_point(rect.left as f64, rect.bottom as f64),
        ];
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Rect::new(min_x as f32, min_y as f32, max_x as f32, max_y as f32)
    }

    pub fn inverse(&self) -> Result<Self, GeometryError> {
        invert(self)
    }
}

/// Build the transform from a `src_w x src_h` camera frame into a
/// `dst_w x dst_h` crop.
///
/// The frame is rotated by `rotation` degrees about its centre, then scaled to
/// the destination. With `maintain_aspect` both axes use the larger scale
/// factor, filling the destination and cropping the overflow; without it each
/// axis is stretched independently.
pub fn compute_forward_transform(
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
    rotation: i32,
    maintain_aspect: bool,
) -> Result<Transform, GeometryError> {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return Err(GeometryError::Degenerate {
            src_w,
            src_h,
            dst_w,
            dst_h,
        });
    }

    let mut transform = Transform::identity();

    if rotation != 0 {
        if rotation % 90 != 0 {
            warn!("Rotation of {} % 90 != 0", rotation);
        }
        transform = transform
            .then_translate(-(src_w as f64) / 2.0, -(src_h as f64) / 2.0)
            .then_rotate(rotation);
    }

    // Account for the rotation when working out the per-axis scale
    let transpose = (rotation.unsigned_abs() + 90) % 180 == 0;
    let (in_w, in_h) = if transpose {
        (src_h, src_w)
    } else {
        (src_w, src_h)
    };

    if in_w != dst_w || in_h != dst_h {
        let scale_x = dst_w as f64 / in_w as f64;
        let scale_y = dst_h as f64 / in_h as f64;
        transform = if maintain_aspect {
            let scale = scale_x.max(scale_y);
            transform.then_scale(scale, scale)
        } else {
            transform.then_scale(scale_x, scale_y)
        };
    }

    if rotation != 0 {
        transform = transform.then_translate(dst_w as f64 / 2.0, dst_h as f64 / 2.0);
    }

    Ok(transform)
}

pub fn invert(transform: &Transform) -> Result<Transform, GeometryError> {
    transform
        .0
        .try_inverse()
        .map(Transform)
        .ok_or(GeometryError::Singular)
}

/// Resample `src` into `dst` through `dst_to_src` (nearest neighbour).
///
/// Destination pixels whose source falls outside the frame are cleared to
/// transparent black.
pub fn warp_into(src: &PixelBuffer, dst_to_src: &Transform, dst: &mut PixelBuffer) {
    let (src_w, src_h) = (src.width() as f64, src.height() as f64);
    let dst_w = dst.width() as usize;
    if dst_w == 0 {
        return;
    }

    let src_pixels = src.pixels();
    let stride = src.width() as usize;

    for (y, row) in dst.pixels_mut().chunks_exact_mut(dst_w).enumerate() {
        for (x, px) in row.iter_mut().enumerate() {
            let (sx, sy) = dst_to_src.map_point(x as f64 + 0.5, y as f64 + 0.5);
            *px = if sx >= 0.0 && sy >= 0.0 && sx < src_w && sy < src_h {
                src_pixels[sy as usize * stride + sx as usize]
            } else {
                0
            };
        }
    }
}

/// Preview geometry fixed when the camera size is chosen
#[derive(Debug, Clone, Copy)]
pub struct FrameGeometry {
    pub preview_width: u32,
    pub preview_height: u32,
    pub crop_size: u32,
    /// Sensor mounting angle as reported by the camera, in degrees
    pub sensor_rotation: i32,
    /// Camera orientation relative to the screen, in degrees
    pub orientation: i32,
    pub frame_to_crop: Transform,
    pub crop_to_frame: Transform,
}

impl FrameGeometry {
    pub fn new(
        preview_width: u32,
        preview_height: u32,
        crop_size: u32,
        sensor_rotation: i32,
        screen_orientation: i32,
        maintain_aspect: bool,
    ) -> Result<Self, GeometryError> {
        let orientation = sensor_rotation
            .checked_sub(screen_orientation)
            .ok_or(GeometryError::Rotation {
                sensor: sensor_rotation,
                screen: screen_orientation,
            })?;
        info!(
            "Camera orientation relative to screen canvas: {}",
            orientation
        );
        info!("Initializing at size {}x{}", preview_width, preview_height);

        let frame_to_crop = compute_forward_transform(
            preview_width,
            preview_height,
            crop_size,
            crop_size,
            orientation,
            maintain_aspect,
        )?;
        let crop_to_frame = invert(&frame_to_crop)?;

        Ok(Self {
            preview_width,
            preview_height,
            crop_size,
            sensor_rotation,
            orientation,
            frame_to_crop,
            crop_to_frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: (f64, f64), expected: (f64, f64), tol: f64) {
        assert!(
            (actual.0 - expected.0).abs() < tol && (actual.1 - expected.1).abs() < tol,
            "{:?} != {:?}",
            actual,
            expected
        );
    }

    #[test]
    fn rotated_stretch_round_trips_origin() {
        let forward = compute_forward_transform(800, 600, 608, 608, 90, false).unwrap();
        let inverse = invert(&forward).unwrap();

        let crop = forward.map_point(0.0, 0.0);
        assert_close(inverse.map_point(crop.0, crop.1), (0.0, 0.0), 1e-3);
    }

    #[test]
    fn rotation_by_90_maps_corners() {
        let forward = compute_forward_transform(800, 600, 608, 608, 90, false).unwrap();

        // Top-left of the frame lands at the top-right of the crop
        assert_close(forward.map_point(0.0, 0.0), (608.0, 0.0), 1e-9);
        // Bottom-left lands at the top-left
        assert_close(forward.map_point(0.0, 600.0), (0.0, 0.0), 1e-9);
        assert_close(forward.map_point(800.0, 600.0), (0.0, 608.0), 1e-9);
    }

    #[test]
    fn unrotated_stretch_scales_axes_independently() {
        let forward = compute_forward_transform(800, 600, 608, 608, 0, false).unwrap();
        assert_close(forward.map_point(800.0, 600.0), (608.0, 608.0), 1e-9);
        assert_close(forward.map_point(400.0, 0.0), (304.0, 0.0), 1e-9);
    }

    #[test]
    fn maintain_aspect_uses_larger_factor() {
        let forward = compute_forward_transform(800, 600, 300, 300, 0, true).unwrap();
        // 300 / 600 = 0.5 beats 300 / 800
        assert_close(forward.map_point(800.0, 600.0), (400.0, 300.0), 1e-9);
    }

    #[test]
    fn forward_and_inverse_are_mutual_inverses() {
        let cases = [
            (640, 480, 300, 0, false),
            (800, 600, 608, 90, false),
            (800, 600, 608, -90, true),
            (1280, 720, 416, 180, false),
            (1280, 720, 416, 270, true),
            (640, 480, 320, 45, false),
        ];
        for (w, h, size, rotation, aspect) in cases {
            let forward = compute_forward_transform(w, h, size, size, rotation, aspect).unwrap();
            let inverse = invert(&forward).unwrap();
            for &(x, y) in &[(0.0, 0.0), (13.5, 200.25), (w as f64, h as f64), (-40.0, 7.0)] {
                let (cx, cy) = forward.map_point(x, y);
                assert_close(inverse.map_point(cx, cy), (x, y), 1e-6);
            }
        }
    }

    #[test]
    fn zero_source_dimension_fails() {
        let err = compute_forward_transform(0, 600, 608, 608, 90, false).unwrap_err();
        assert!(matches!(err, GeometryError::Degenerate { src_w: 0, .. }));
        assert!(FrameGeometry::new(800, 0, 608, 90, 0, false).is_err());
    }

    #[test]
    fn overflowing_rotation_fails() {
        let err = FrameGeometry::new(800, 600, 608, i32::MIN, 90, false).unwrap_err();
        assert_eq!(
            err,
            GeometryError::Rotation {
                sensor: i32::MIN,
                screen: 90
            }
        );
        // The most negative angle still works out its axes
        assert!(compute_forward_transform(800, 600, 608, 608, i32::MIN, false).is_ok());
    }

    #[test]
    fn singular_matrix_cannot_be_inverted() {
        let flat = Transform::identity().then_scale(0.0, 1.0);
        assert_eq!(invert(&flat), Err(GeometryError::Singular));
    }

    #[test]
    fn map_rect_returns_bounding_box() {
        let forward = compute_forward_transform(800, 600, 608, 608, 90, false).unwrap();
        let rect = forward.map_rect(&Rect::new(0.0, 0.0, 400.0, 300.0));
        // 400 px of width becomes 304 px of height after rotation and stretch
        assert!((rect.left - 304.0).abs() < 1e-3);
        assert!((rect.right - 608.0).abs() < 1e-3);
        assert!(rect.top.abs() < 1e-3);
        assert!((rect.bottom - 304.0).abs() < 1e-3);
    }

    #[test]
    fn warp_samples_nearest_source_pixel() {
        let mut src = PixelBuffer::new(4, 2);
        for (i, px) in src.pixels_mut().iter_mut().enumerate() {
            *px = 0xff00_0000 | i as u32;
        }
        let forward = compute_forward_transform(4, 2, 2, 2, 0, false).unwrap();
        let mut dst = PixelBuffer::new(2, 2);
        warp_into(&src, &invert(&forward).unwrap(), &mut dst);

        // Column scale 0.5, row scale 1
        assert_eq!(dst.pixels(), &[0xff00_0001, 0xff00_0003, 0xff00_0005, 0xff00_0007]);
    }

    #[test]
    fn warp_clears_pixels_outside_the_frame() {
        let mut src = PixelBuffer::new(2, 2);
        src.pixels_mut().fill(0xffff_ffff);
        let mut dst = PixelBuffer::new(4, 4);
        dst.pixels_mut().fill(0x1234_5678);

        // Identity into a larger crop
        warp_into(&src, &Transform::identity(), &mut dst);

        assert_eq!(dst.get(1, 1), 0xffff_ffff);
        assert_eq!(dst.get(3, 3), 0);
        assert_eq!(dst.get(2, 0), 0);
    }
}
