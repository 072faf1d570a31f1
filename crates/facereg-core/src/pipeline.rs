//! Locate → crop → extract, the shared prefix of enrollment and matching.
//!
//! The face locator and embedding extractor are capabilities behind traits so
//! the pipeline is independent of the models that back them.

use crate::crop;
use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

/// Default width above which images are downscaled before detection.
pub const DEFAULT_MAX_DETECT_WIDTH: u32 = 640;

/// Finds the single most prominent face in an image.
pub trait FaceLocator {
    fn locate(&mut self, image: &RgbImage) -> Result<Option<BoundingBox>, DetectorError>;
}

/// Turns a face crop of exactly [`input_size`](Self::input_size) into an embedding.
pub trait EmbeddingExtractor {
    /// Required `(width, height)` of the face crop.
    fn input_size(&self) -> (u32, u32);
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError>;
}

impl<T: FaceLocator + ?Sized> FaceLocator for Box<T> {
    fn locate(&mut self, image: &RgbImage) -> Result<Option<BoundingBox>, DetectorError> {
        (**self).locate(image)
    }
}

impl<T: EmbeddingExtractor + ?Sized> EmbeddingExtractor for Box<T> {
    fn input_size(&self) -> (u32, u32) {
        (**self).input_size()
    }

    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        (**self).extract(face)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no faces detected")]
    NoFaceDetected,
    #[error("face region is empty")]
    EmptyFaceRegion,
    #[error("face detection error: {0}")]
    Detection(#[from] DetectorError),
    #[error("failed to extract features: {0}")]
    Extraction(#[from] RecognizerError),
}

/// A locator/extractor pair plus the detection size limit.
pub struct FacePipeline<L, E> {
    locator: L,
    extractor: E,
    max_detect_width: u32,
}

impl<L: FaceLocator, E: EmbeddingExtractor> FacePipeline<L, E> {
    pub fn new(locator: L, extractor: E) -> Self {
        Self {
            locator,
            extractor,
            max_detect_width: DEFAULT_MAX_DETECT_WIDTH,
        }
    }

    /// Images wider than this are downscaled before detection; 0 disables it.
    pub fn with_max_detect_width(mut self, max_detect_width: u32) -> Self {
        self.max_detect_width = max_detect_width;
        self
    }

    /// Compute the embedding of the most prominent face in `image`.
    pub fn embed(&mut self, image: RgbImage) -> Result<Embedding, PipelineError> {
        let image = crop::limit_width(image, self.max_detect_width);

        let bbox = self
            .locator
            .locate(&image)
            .map_err(|e| {
                tracing::error!(error = %e, "face detection failed");
                e
            })?
            .ok_or(PipelineError::NoFaceDetected)?;

        tracing::debug!(
            x = bbox.x,
            y = bbox.y,
            width = bbox.width,
            height = bbox.height,
            confidence = bbox.confidence,
            "face located"
        );

        let face = crop::crop_face(&image, &bbox).ok_or(PipelineError::EmptyFaceRegion)?;

        let (w, h) = self.extractor.input_size();
        let input = crop::resize_to(&face, w, h);

        let embedding = self.extractor.extract(&input).map_err(|e| {
            tracing::error!(error = %e, "embedding extraction failed");
            e
        })?;

        Ok(embedding)
    }
}
