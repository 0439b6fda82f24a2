//! facefile-hw — Frame sources for the capture flows.
//!
//! Provides V4L2-based webcam access and a still-image source, both
//! implementing `facefile_core::CameraDevice`.

pub mod camera;
pub mod frame;
pub mod still;

pub use camera::{PixelFormat, V4lCamera};
pub use still::StillImage;
