//! Folder-per-identity gallery storage.
//!
//! Layout: `<root>/user_<n>/<YYYYMMDD_HHMMSS>.jpg`. The tree is the only
//! source of truth and is re-read on every call; nothing is cached.

use crate::types::{Identity, ReferenceImage};
use chrono::NaiveDateTime;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp format used for image filenames (second resolution).
pub const IMAGE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Extension of every image written by the gallery.
pub const IMAGE_EXTENSION: &str = "jpg";

/// Upper bound on `_<n>` suffixes tried for images captured in the same second.
const MAX_SAME_SECOND_SUFFIX: u32 = 1000;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("identity directory already exists: {}", .0.display())]
    IdentityExists(PathBuf),
    #[error("unknown identity: {0}")]
    UnknownIdentity(Identity),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Repository of identities and their reference images.
///
/// The matcher and capture controller only talk to this trait, so an indexed
/// store can replace the directory tree without touching them.
pub trait GalleryStore {
    /// All identities, ascending.
    fn list_identities(&self) -> Result<Vec<Identity>, StorageError>;

    /// Reference images of one identity, ordered by filename.
    fn list_images(&self, identity: Identity) -> Result<Vec<ReferenceImage>, StorageError>;

    /// Allocate `1 + max(existing)` (or 1) and create its directory.
    fn create_identity(&self) -> Result<Identity, StorageError>;

    /// Store an encoded image under `identity`, named by `taken_at`.
    fn append_image(
        &self,
        identity: Identity,
        bytes: &[u8],
        taken_at: NaiveDateTime,
    ) -> Result<PathBuf, StorageError>;

    /// Whether `identity` currently exists.
    fn contains(&self, identity: Identity) -> Result<bool, StorageError> {
        Ok(self.list_identities()?.contains(&identity))
    }
}

/// Gallery backed by a directory tree on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirGallery {
    root: PathBuf,
}

impl DirGallery {
    /// Open the gallery at `root`, creating the directory if missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        tracing::debug!(root = %root.display(), "gallery opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `identity` (whether or not it exists).
    pub fn identity_dir(&self, identity: Identity) -> PathBuf {
        self.root.join(identity.dir_name())
    }
}

impl GalleryStore for DirGallery {
    fn list_identities(&self) -> Result<Vec<Identity>, StorageError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StorageError::io(&self.root, e))?;

        let mut identities = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(Identity::from_dir_name) {
                Some(identity) => identities.push(identity),
                None => tracing::debug!(dir = %path.display(), "ignoring non-identity directory"),
            }
        }

        identities.sort_unstable();
        Ok(identities)
    }

    fn list_images(&self, identity: Identity) -> Result<Vec<ReferenceImage>, StorageError> {
        let dir = self.identity_dir(identity);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::UnknownIdentity(identity))
            }
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let captured_at = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(parse_image_stamp);
            images.push(ReferenceImage {
                identity,
                path,
                captured_at,
            });
        }

        images.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
        Ok(images)
    }

    fn create_identity(&self) -> Result<Identity, StorageError> {
        let identity = match self.list_identities()?.last() {
            None => Identity::first(),
            Some(max) => max.next().ok_or_else(|| {
                StorageError::io(
                    &self.root,
                    io::Error::other(format!("identity space exhausted after {max}")),
                )
            })?,
        };

        let dir = self.identity_dir(identity);
        match fs::create_dir(&dir) {
            Ok(()) => {
                tracing::info!(identity = %identity, dir = %dir.display(), "identity created");
                Ok(identity)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StorageError::IdentityExists(dir))
            }
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }

    fn append_image(
        &self,
        identity: Identity,
        bytes: &[u8],
        taken_at: NaiveDateTime,
    ) -> Result<PathBuf, StorageError> {
        let dir = self.identity_dir(identity);
        if !dir.is_dir() {
            return Err(StorageError::UnknownIdentity(identity));
        }

        let stamp = taken_at.format(IMAGE_STAMP_FORMAT).to_string();
        for suffix in 0..MAX_SAME_SECOND_SUFFIX {
            let name = if suffix == 0 {
                format!("{stamp}.{IMAGE_EXTENSION}")
            } else {
                format!("{stamp}_{suffix}.{IMAGE_EXTENSION}")
            };
            let path = dir.join(name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::io(&path, e)),
            };

            if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_all()) {
                drop(file);
                let _ = fs::remove_file(&path);
                return Err(StorageError::io(&path, e));
            }

            tracing::info!(
                identity = %identity,
                path = %path.display(),
                bytes = bytes.len(),
                "image appended"
            );
            return Ok(path);
        }

        Err(StorageError::io(
            &dir,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("too many images stamped {stamp}"),
            ),
        ))
    }

    fn contains(&self, identity: Identity) -> Result<bool, StorageError> {
        Ok(self.identity_dir(identity).is_dir())
    }
}

/// Decode the capture time from a file stem like `20240131_235959` or `20240131_235959_2`.
pub fn parse_image_stamp(stem: &str) -> Option<NaiveDateTime> {
    let stamp = stem.get(..15)?;
    let rest = &stem[15..];
    if !(rest.is_empty() || rest.starts_with('_')) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, IMAGE_STAMP_FORMAT).ok()
}
