//! Size-budgeted JPEG re-encoding.

use crate::probe::encode_jpeg;
use image::RgbImage;

/// Parameters of the quality step-down loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionSettings {
    /// Encoded size to get at or under, in bytes.
    pub target_bytes: usize,
    pub start_quality: u8,
    pub quality_step: u8,
    /// Quality floor; the loop stops here even if still over budget.
    pub min_quality: u8,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            target_bytes: 200 * 1024,
            start_quality: 90,
            quality_step: 5,
            min_quality: 10,
        }
    }
}

impl CompressionSettings {
    pub fn with_target_kb(target_kb: usize) -> Self {
        Self {
            target_bytes: target_kb.saturating_mul(1024),
            ..Self::default()
        }
    }
}

/// A JPEG encoding and the quality that produced it.
#[derive(Debug, Clone)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    pub quality: u8,
}

impl Compressed {
    /// True when the loop ended on the size budget rather than the floor.
    pub fn within(&self, settings: &CompressionSettings) -> bool {
        self.bytes.len() <= settings.target_bytes
    }
}

/// Re-encode at decreasing quality until the output fits `target_bytes`
/// or quality reaches `min_quality`. Returns the last encoding.
pub fn compress_jpeg(
    image: &RgbImage,
    settings: &CompressionSettings,
) -> Result<Compressed, image::ImageError> {
    let floor = settings.min_quality.clamp(1, 100);
    let step = settings.quality_step.max(1);
    let mut quality = settings.start_quality.clamp(floor, 100);

    loop {
        let bytes = encode_jpeg(image, quality)?;
        if bytes.len() <= settings.target_bytes || quality <= floor {
            tracing::debug!(
                quality,
                bytes = bytes.len(),
                target = settings.target_bytes,
                "compressed frame"
            );
            return Ok(Compressed { bytes, quality });
        }
        quality = quality.saturating_sub(step).max(floor);
    }
}
