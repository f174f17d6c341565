//! glimpse-hw: Hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access with conversion of YUYV, GREY and MJPG
//! buffers to interleaved RGB frames.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{CameraSource, FrameSource};
