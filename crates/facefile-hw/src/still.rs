//! Still-image frame source: serves an image file as the captured frame.

use facefile_core::camera::{CameraDevice, CameraError, FrameReader};
use image::RgbImage;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct StillImage {
    path: PathBuf,
}

impl StillImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CameraDevice for StillImage {
    fn open(&self) -> Result<Box<dyn FrameReader + '_>, CameraError> {
        if !self.path.is_file() {
            return Err(CameraError::DeviceNotFound(self.path.display().to_string()));
        }
        Ok(Box::new(StillHandle { source: self }))
    }
}

struct StillHandle<'a> {
    source: &'a StillImage,
}

impl FrameReader for StillHandle<'_> {
    fn read_frame(&mut self) -> Result<RgbImage, CameraError> {
        let path = &self.source.path;
        let image = image::open(path)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "read still image");
        Ok(image.to_rgb8())
    }
}
