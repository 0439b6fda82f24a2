//! Capture flows: decide which identity a frame belongs to and file it.
//!
//! The decision functions ([`CaptureController::verify_or_create`],
//! [`CaptureController::save_to_pinned`]) only depend on the gallery, the
//! session and the probe. The `capture_*` wrappers add camera acquisition.

use crate::camera::{grab_frame, CameraDevice, CameraError};
use crate::compress::{compress_jpeg, CompressionSettings};
use crate::gallery::{GalleryStore, StorageError};
use crate::matcher::{Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::probe::{Probe, ProbeError, RAW_JPEG_QUALITY};
use crate::session::Session;
use crate::types::Identity;
use std::borrow::Cow;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[from] CameraError),
    #[error("no identity connected; verify or create a person first")]
    NoPinnedIdentity,
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("probe: {0}")]
    Probe(#[from] ProbeError),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
}

impl CaptureError {
    /// Errors that should end the process rather than just the operation.
    ///
    /// Raw I/O failures on the gallery (e.g. permissions) are fatal; a
    /// colliding or missing identity directory only aborts the capture.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::Storage(StorageError::Io { .. }))
    }
}

/// How the destination identity was chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// A pin was active; the matcher was not consulted.
    Pinned,
    /// The matcher found the identity at this distance; it is now pinned.
    Matched { distance: f32 },
    /// No match; a new identity was created.
    Created,
}

/// Where a captured frame ended up.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub identity: Identity,
    pub placement: Placement,
    pub path: PathBuf,
    /// JPEG quality of the stored encoding.
    pub quality: u8,
}

/// Tunables for the capture flows.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Distance cutoff for the matcher (strict).
    pub match_threshold: f32,
    pub compression: CompressionSettings,
    /// Also compress the first image of a new identity instead of storing
    /// the raw encoding.
    ///
    /// Pinned and matched captures are always stored compressed, so with the
    /// default `false` a new identity's first image is the only one kept at
    /// raw quality. Setting this makes every branch compress.
    pub compress_new_identity: bool,
    /// Directory probes are staged in while being matched.
    pub staging_dir: PathBuf,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            compression: CompressionSettings::default(),
            compress_new_identity: false,
            staging_dir: std::env::temp_dir(),
        }
    }
}

/// Stored encoding of a frame.
enum Encoding {
    Raw,
    Compressed,
}

pub struct CaptureController<G, M> {
    gallery: G,
    matcher: M,
    settings: CaptureSettings,
}

impl<G: GalleryStore, M: Matcher> CaptureController<G, M> {
    pub fn new(gallery: G, matcher: M, settings: CaptureSettings) -> Self {
        Self {
            gallery,
            matcher,
            settings,
        }
    }

    pub fn gallery(&self) -> &G {
        &self.gallery
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Manually pin an existing identity.
    pub fn connect(&self, session: &mut Session, identity: Identity) -> Result<(), CaptureError> {
        if !self.gallery.contains(identity)? {
            return Err(StorageError::UnknownIdentity(identity).into());
        }
        session.pin(identity);
        Ok(())
    }

    /// Clear the pin, returning what was pinned.
    pub fn disconnect(&self, session: &mut Session) -> Option<Identity> {
        session.unpin()
    }

    /// Capture one frame and file it via [`verify_or_create`](Self::verify_or_create).
    pub fn capture_and_verify(
        &self,
        session: &mut Session,
        camera: &dyn CameraDevice,
    ) -> Result<CaptureOutcome, CaptureError> {
        let probe = self.capture_probe(camera)?;
        self.verify_or_create(session, &probe)
    }

    /// Capture one frame and store it compressed under the pinned identity.
    ///
    /// Fails with [`CaptureError::NoPinnedIdentity`] before touching the camera
    /// when nothing is pinned.
    pub fn capture_and_save(
        &self,
        session: &Session,
        camera: &dyn CameraDevice,
    ) -> Result<CaptureOutcome, CaptureError> {
        if session.current().is_none() {
            return Err(CaptureError::NoPinnedIdentity);
        }
        let probe = self.capture_probe(camera)?;
        self.save_to_pinned(session, &probe)
    }

    /// Pinned → store there. Otherwise match; on a hit pin and store, on a
    /// miss create a new identity and store.
    pub fn verify_or_create(
        &self,
        session: &mut Session,
        probe: &Probe,
    ) -> Result<CaptureOutcome, CaptureError> {
        if let Some(identity) = session.current() {
            tracing::debug!(identity = %identity, "pinned identity; skipping matcher");
            return self.store(identity, Placement::Pinned, probe, Encoding::Compressed);
        }

        let result = self
            .matcher
            .find_match(probe, &self.gallery, self.settings.match_threshold)?;

        match result.identity {
            Some(identity) => {
                tracing::info!(identity = %identity, distance = result.distance, "match found");
                session.pin(identity);
                let placement = Placement::Matched {
                    distance: result.distance,
                };
                self.store(identity, placement, probe, Encoding::Compressed)
            }
            None => {
                let identity = self.gallery.create_identity()?;
                tracing::info!(identity = %identity, "no match; new identity");
                let encoding = if self.settings.compress_new_identity {
                    Encoding::Compressed
                } else {
                    Encoding::Raw
                };
                self.store(identity, Placement::Created, probe, encoding)
            }
        }
    }

    /// Store the probe compressed under the pinned identity.
    pub fn save_to_pinned(
        &self,
        session: &Session,
        probe: &Probe,
    ) -> Result<CaptureOutcome, CaptureError> {
        let identity = session.current().ok_or(CaptureError::NoPinnedIdentity)?;
        self.store(identity, Placement::Pinned, probe, Encoding::Compressed)
    }

    fn capture_probe(&self, camera: &dyn CameraDevice) -> Result<Probe, CaptureError> {
        let frame = grab_frame(camera)?;
        let captured_at = chrono::Local::now().naive_local();
        Ok(Probe::stage(frame, captured_at, &self.settings.staging_dir)?)
    }

    fn store(
        &self,
        identity: Identity,
        placement: Placement,
        probe: &Probe,
        encoding: Encoding,
    ) -> Result<CaptureOutcome, CaptureError> {
        let (bytes, quality) = match encoding {
            Encoding::Raw => (Cow::Borrowed(probe.encoded()), RAW_JPEG_QUALITY),
            Encoding::Compressed => {
                let compressed = compress_jpeg(probe.image(), &self.settings.compression)?;
                (Cow::Owned(compressed.bytes), compressed.quality)
            }
        };

        let path = self
            .gallery
            .append_image(identity, &bytes, probe.captured_at())?;

        Ok(CaptureOutcome {
            identity,
            placement,
            path,
            quality,
        })
    }
}
