pub mod frame;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{CaptureError, Frame, FrameHandle, PixelFormat, Plane};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Capture;
