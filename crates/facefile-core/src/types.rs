use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Prefix of every identity directory name (`user_<n>`).
pub const IDENTITY_PREFIX: &str = "user_";

/// A distinct person in the gallery, backed by the directory `user_<n>`.
///
/// Identifiers start at 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(u32);

impl Identity {
    /// Build an identity from its number. Returns `None` for 0, which is never allocated.
    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn id(self) -> u32 {
        self.0
    }

    /// The identity that follows this one, or `None` once the id space is used up.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// The first identity of an empty gallery.
    pub fn first() -> Self {
        Self(1)
    }

    /// Directory name for this identity, e.g. `user_3`.
    pub fn dir_name(self) -> String {
        format!("{IDENTITY_PREFIX}{}", self.0)
    }

    /// Parse a directory name of the form `user_<n>`.
    ///
    /// Only the canonical spelling is accepted, so `user_07` is not an identity.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let digits = name.strip_prefix(IDENTITY_PREFIX)?;
        if digits.is_empty()
            || digits.starts_with('0')
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        digits.parse().ok().and_then(Self::new)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// A stored image belonging to exactly one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub identity: Identity,
    pub path: PathBuf,
    /// Capture time decoded from the filename, if it follows the naming scheme.
    pub captured_at: Option<NaiveDateTime>,
}

/// Face embedding vector produced by an embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "facenet512").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance in [0, 2]. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}
