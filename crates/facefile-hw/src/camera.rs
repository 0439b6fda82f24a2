//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, FrameError};
use facefile_core::camera::{CameraDevice, CameraError, FrameReader};
use image::RgbImage;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Raw captures attempted per requested frame before giving up on dark frames.
const MAX_ATTEMPTS_PER_FRAME: usize = 5;

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion-JPEG: each buffer is a complete JPEG image.
    Mjpeg,
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Webcam settings. The device is opened per capture and released afterwards.
#[derive(Debug, Clone)]
pub struct V4lCamera {
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    /// Frames discarded after streaming starts (auto-exposure settling).
    pub warmup_frames: usize,
}

impl V4lCamera {
    pub fn new(device_path: impl Into<String>, width: u32, height: u32, warmup_frames: usize) -> Self {
        Self {
            device_path: device_path.into(),
            width,
            height,
            warmup_frames,
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CameraDevice for V4lCamera {
    fn open(&self) -> Result<Box<dyn FrameReader + '_>, CameraError> {
        Ok(Box::new(V4lHandle::open(self)?))
    }
}

/// An open V4L2 device. Dropping it closes the file descriptor.
pub struct V4lHandle {
    device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    warmup_frames: usize,
}

impl V4lHandle {
    fn open(config: &V4lCamera) -> Result<Self, CameraError> {
        let device_path = config.device_path.as_str();
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for MJPG; most UVC webcams offer it at full resolution. Fall back
        // to whatever YUYV mode the driver negotiates.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"MJPG");
        fmt.width = config.width;
        fmt.height = config.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpeg
        } else if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need MJPG or YUYV)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
            warmup_frames: config.warmup_frames,
        })
    }

    fn decode(&self, buf: &[u8]) -> Result<RgbImage, FrameError> {
        match self.pixel_format {
            PixelFormat::Mjpeg => frame::decode_mjpeg(buf),
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
        }
    }
}

impl FrameReader for V4lHandle {
    /// Start streaming, discard warm-up frames, return the first non-dark frame.
    fn read_frame(&mut self) -> Result<RgbImage, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        for _ in 0..self.warmup_frames {
            stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
        }

        let mut last = None;
        for _ in 0..MAX_ATTEMPTS_PER_FRAME {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
            let used = (meta.bytesused as usize).min(buf.len());
            let payload = if used > 0 { &buf[..used] } else { buf };

            let image = match self.decode(payload) {
                Ok(image) => image,
                Err(e) => {
                    tracing::debug!(seq = meta.sequence, error = %e, "skipping undecodable frame");
                    continue;
                }
            };

            if frame::is_dark_frame(&image, 0.95) {
                tracing::debug!(seq = meta.sequence, "skipping dark frame");
                last = Some(image);
                continue;
            }
            return Ok(image);
        }

        // Only dark frames: a dim room is still a capture.
        last.ok_or_else(|| CameraError::CaptureFailed("no decodable frame received".into()))
    }
}
