//! rollcall-hw: Camera capture for enrollment and the live session loop.
//!
//! Provides V4L2 capture converted to 8-bit grayscale frames, plus the
//! [`FrameSource`] seam the capture loops are written against.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::{Frame, FrameError};

/// Anything that yields camera frames one at a time.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}
