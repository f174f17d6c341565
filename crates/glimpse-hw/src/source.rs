//! Exclusive, re-openable frame source.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;

/// A video input that can be acquired, read and released repeatedly.
pub trait FrameSource {
    /// Acquire the device. Calling `open` on an open source is a no-op.
    fn open(&mut self) -> Result<(), CameraError>;
    fn is_open(&self) -> bool;
    fn capture(&mut self) -> Result<Frame, CameraError>;
    /// Release the device. Calling `release` on a closed source is a no-op.
    fn release(&mut self);
}

/// [`FrameSource`] over a V4L2 device path.
pub struct CameraSource {
    device_path: String,
    width: u32,
    height: u32,
    camera: Option<Camera>,
}

impl CameraSource {
    pub fn new(device_path: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            device_path: device_path.into(),
            width,
            height,
            camera: None,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<(), CameraError> {
        if self.camera.is_none() {
            self.camera = Some(Camera::open(&self.device_path, self.width, self.height)?);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.camera.is_some()
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        self.camera
            .as_ref()
            .ok_or(CameraError::NotOpen)?
            .capture_frame()
    }

    fn release(&mut self) {
        if let Some(camera) = self.camera.take() {
            tracing::info!(device = %camera.device_path, "camera released");
        }
    }
}
