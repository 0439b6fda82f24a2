//! Face embedding verifier via ONNX Runtime.
//!
//! Runs a FaceNet-512 style model on the whole frame (detection is not
//! enforced) and compares embeddings by cosine distance.

use crate::probe::Probe;
use crate::types::Embedding;
use crate::verifier::{Verdict, Verifier, VerifyError};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FACENET_INPUT_SIZE: u32 = 160;
const FACENET_EMBEDDING_DIM: usize = 512;
const FACENET_MODEL_VERSION: &str = "facenet512";

/// Cosine distance at or below which two FaceNet-512 embeddings are the same person.
pub const DEFAULT_VERIFY_THRESHOLD: f32 = 0.30;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// FaceNet-512 embedding extractor.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the embedding model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session })
    }

    /// Extract an L2-normalized embedding from a whole RGB frame.
    pub fn extract(&mut self, image: &RgbImage) -> Result<Embedding, EmbedderError> {
        let input = preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != FACENET_EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(FACENET_MODEL_VERSION.to_string()),
        })
    }
}

/// Resize to 160x160 and standardize per image into an NHWC float tensor.
fn preprocess(image: &RgbImage) -> Array4<f32> {
    let size = FACENET_INPUT_SIZE as usize;
    let resized = image::imageops::resize(
        image,
        FACENET_INPUT_SIZE,
        FACENET_INPUT_SIZE,
        FilterType::Triangle,
    );

    let raw = resized.as_raw();
    let n = raw.len() as f32;
    let mean = raw.iter().map(|&v| v as f32).sum::<f32>() / n;
    let var = raw.iter().map(|&v| (v as f32 - mean).powi(2)).sum::<f32>() / n;
    // Floor the deviation so flat frames don't divide by zero.
    let std = var.sqrt().max(1.0 / n.sqrt());

    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = (pixel[c] as f32 - mean) / std;
        }
    }
    tensor
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

/// Embedding of the most recent probe, keyed by its staged path.
#[derive(Default)]
struct ProbeCache(RefCell<Option<(PathBuf, Embedding)>>);

impl ProbeCache {
    fn get_or_try<E>(
        &self,
        key: &Path,
        compute: impl FnOnce() -> Result<Embedding, E>,
    ) -> Result<Embedding, E> {
        if let Some((path, embedding)) = self.0.borrow().as_ref() {
            if path == key {
                return Ok(embedding.clone());
            }
        }
        let embedding = compute()?;
        *self.0.borrow_mut() = Some((key.to_path_buf(), embedding.clone()));
        Ok(embedding)
    }
}

/// [`Verifier`] backed by a local embedding model.
pub struct EmbeddingVerifier {
    embedder: RefCell<FaceEmbedder>,
    probe_cache: ProbeCache,
    verify_threshold: f32,
}

impl EmbeddingVerifier {
    pub fn new(embedder: FaceEmbedder, verify_threshold: f32) -> Self {
        Self {
            embedder: RefCell::new(embedder),
            probe_cache: ProbeCache::default(),
            verify_threshold,
        }
    }

    fn embed(&self, image: &RgbImage) -> Result<Embedding, VerifyError> {
        self.embedder
            .borrow_mut()
            .extract(image)
            .map_err(|e| VerifyError::Embedding(e.to_string()))
    }
}

impl Verifier for EmbeddingVerifier {
    fn verify(&self, probe: &Probe, reference: &Path) -> Result<Verdict, VerifyError> {
        let stored = image::open(reference)
            .map_err(|source| VerifyError::Reference {
                path: reference.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let a = self
            .probe_cache
            .get_or_try(probe.path(), || self.embed(probe.image()))?;
        let b = self.embed(&stored)?;
        let distance = a.cosine_distance(&b);

        Ok(Verdict {
            verified: distance <= self.verify_threshold,
            distance,
        })
    }
}
