//! facefile-core — Folder-per-identity face gallery.
//!
//! Files captured frames into `user_<n>` directories: a brute-force scan
//! finds the closest verified identity, a session pin bypasses the scan,
//! and unmatched faces get a fresh identity.

pub mod camera;
pub mod compress;
pub mod controller;
pub mod embedder;
pub mod gallery;
pub mod matcher;
pub mod probe;
pub mod session;
pub mod types;
pub mod verifier;

pub use camera::{CameraDevice, CameraError, FrameReader};
pub use controller::{CaptureController, CaptureError, CaptureOutcome, CaptureSettings, Placement};
pub use gallery::{DirGallery, GalleryStore, StorageError};
pub use matcher::{MatchResult, Matcher, ScanMatcher};
pub use probe::Probe;
pub use session::Session;
pub use types::{Embedding, Identity, ReferenceImage};
pub use verifier::{CommandVerifier, Verdict, Verifier, VerifyError};
