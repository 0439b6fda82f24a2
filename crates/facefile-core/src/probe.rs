//! Probe images: the transient frame being matched or saved.

use chrono::NaiveDateTime;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// JPEG quality of the staged ("raw") probe encoding.
pub const RAW_JPEG_QUALITY: u8 = 95;

static PROBE_COUNTER: AtomicU32 = AtomicU32::new(0);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to encode probe: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to stage probe at {}: {source}", path.display())]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One captured frame, staged as a JPEG file for path-based verifiers.
///
/// The staged file is removed when the probe is dropped.
pub struct Probe {
    image: RgbImage,
    encoded: Vec<u8>,
    path: PathBuf,
    captured_at: NaiveDateTime,
}

impl Probe {
    /// Encode `image` at [`RAW_JPEG_QUALITY`] and write it into `staging_dir`.
    pub fn stage(
        image: RgbImage,
        captured_at: NaiveDateTime,
        staging_dir: &Path,
    ) -> Result<Self, ProbeError> {
        let encoded = encode_jpeg(&image, RAW_JPEG_QUALITY)?;

        let seq = PROBE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = staging_dir.join(format!("facefile-probe-{}-{seq}.jpg", std::process::id()));
        std::fs::write(&path, &encoded).map_err(|source| ProbeError::Stage {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), bytes = encoded.len(), "probe staged");

        Ok(Self {
            image,
            encoded,
            path,
            captured_at,
        })
    }

    /// Decoded pixels.
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Raw JPEG encoding, as stored for a newly created identity.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Path of the staged JPEG file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn captured_at(&self) -> NaiveDateTime {
        self.captured_at
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "failed to remove staged probe");
        }
    }
}

/// Encode an RGB image as JPEG at the given quality (1–100).
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf)
}
