//! ArcFace embedding extractor via ONNX Runtime.
//!
//! Produces 512-dimensional embeddings from 112×112 RGB face crops using the
//! w600k_r50 model. Embeddings are returned as the model emits them.

use crate::pipeline::EmbeddingExtractor;
use crate::types::Embedding;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (download from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is {actual:?}, expected {expected:?}")]
    InputSize { expected: (u32, u32), actual: (u32, u32) },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based embedding extractor.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Preprocess a 112×112 RGB crop into a NCHW float tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

impl EmbeddingExtractor for FaceRecognizer {
    fn input_size(&self) -> (u32, u32) {
        (ARCFACE_INPUT_SIZE as u32, ARCFACE_INPUT_SIZE as u32)
    }

    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        check_input_size(face, self.input_size())?;

        let input = Self::preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        validate_embedding(raw)?;
        Ok(Embedding::new(raw.to_vec()))
    }
}

fn check_input_size(face: &RgbImage, expected: (u32, u32)) -> Result<(), RecognizerError> {
    if face.dimensions() != expected {
        return Err(RecognizerError::InputSize {
            expected,
            actual: face.dimensions(),
        });
    }
    Ok(())
}

fn validate_embedding(raw: &[f32]) -> Result<(), RecognizerError> {
    if raw.len() != ARCFACE_EMBEDDING_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
            raw.len()
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(RecognizerError::InferenceFailed("embedding contains non-finite values".into()));
    }
    Ok(())
}
