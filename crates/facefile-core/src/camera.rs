//! Camera boundary used by the capture flows.
//!
//! A [`CameraDevice`] is opened per capture; the returned [`FrameReader`]
//! owns the device and releases it when dropped, including on error paths.

use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Something frames can be read from.
pub trait CameraDevice {
    fn open(&self) -> Result<Box<dyn FrameReader + '_>, CameraError>;
}

/// An open camera handle. Dropping it closes the device.
pub trait FrameReader {
    fn read_frame(&mut self) -> Result<RgbImage, CameraError>;
}

/// Open the camera, read one frame, release the camera.
pub fn grab_frame(camera: &dyn CameraDevice) -> Result<RgbImage, CameraError> {
    let mut handle = camera.open()?;
    let frame = handle.read_frame()?;
    drop(handle);
    tracing::debug!(width = frame.width(), height = frame.height(), "frame captured");
    Ok(frame)
}
