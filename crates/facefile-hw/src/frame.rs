//! Frame decoding — YUYV and MJPEG to RGB, dark-frame detection.

use image::{ImageFormat, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_u8(y + 1.402 * v));
            rgb.push(clamp_u8(y - 0.344_136 * u - 0.714_136 * v));
            rgb.push(clamp_u8(y + 1.772 * u));
        }
    }

    let actual = rgb.len();
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected: (width * height * 3) as usize,
        actual,
    })
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Decode one MJPEG buffer (a complete JPEG image).
pub fn decode_mjpeg(buf: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8())
}

/// Returns true if more than `threshold_pct` of pixels have luma below 32.
///
/// Webcams often deliver black frames right after streaming starts.
pub fn is_dark_frame(frame: &RgbImage, threshold_pct: f32) -> bool {
    let total = (frame.width() * frame.height()) as usize;
    if total == 0 {
        return true;
    }
    let dark_count = frame.pixels().filter(|p| luma(p.0) < 32).count();
    (dark_count as f32 / total as f32) > threshold_pct
}

fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}
