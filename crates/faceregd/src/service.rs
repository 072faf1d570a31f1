//! Enrollment and match orchestration.
//!
//! Each operation runs decode → locate → crop → extract, then either upserts
//! the embedding or matches it against every stored record. The first failing
//! stage ends the request.

use crate::engine::{Engine, EngineError};
use facereg_core::{CosineMatcher, DecodeError, Embedding, ImageDecoder, Matcher, PipelineError, QueryResult};
use facereg_store::{summarize, Backend, FaceSummary, RecordStore, StoreError, UpsertOutcome};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("No faces detected")]
    NoFaceDetected,
    #[error("Face region is empty")]
    EmptyFaceRegion,
    #[error("Face detection error: {0}")]
    DetectionFailure(String),
    #[error("Failed to extract features: {0}")]
    ExtractionFailure(String),
    #[error("Face models unavailable: {0}")]
    EngineUnavailable(String),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Name not found: {0}")]
    NotFound(String),
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Pipeline(PipelineError::NoFaceDetected) => ServiceError::NoFaceDetected,
            EngineError::Pipeline(PipelineError::EmptyFaceRegion) => ServiceError::EmptyFaceRegion,
            EngineError::Pipeline(PipelineError::Detection(e)) => ServiceError::DetectionFailure(e.to_string()),
            EngineError::Pipeline(PipelineError::Extraction(e)) => ServiceError::ExtractionFailure(e.to_string()),
            other => ServiceError::EngineUnavailable(other.to_string()),
        }
    }
}

pub struct FaceService {
    engine: Arc<Engine>,
    store: Arc<dyn RecordStore>,
    decoder: ImageDecoder,
    matcher: CosineMatcher,
}

impl FaceService {
    pub fn new(engine: Arc<Engine>, store: Arc<dyn RecordStore>, decoder: ImageDecoder, matcher: CosineMatcher) -> Self {
        Self {
            engine,
            store,
            decoder,
            matcher,
        }
    }

    pub fn backend(&self) -> Backend {
        self.store.backend()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Decode `image` and embed its most prominent face.
    async fn embed(&self, image: Vec<u8>) -> Result<Embedding, ServiceError> {
        let decoder = self.decoder.clone();
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&image))
            .await
            .map_err(|e| DecodeError::Undecodable(e.to_string()))?;
        let decoded = decoded.map_err(|e| {
            tracing::warn!(error = %e, "image decode failed");
            e
        })?;

        Ok(self.engine.embed(decoded).await?)
    }

    /// Enroll the face in `image` under `(name, orientation)`, replacing any
    /// previous embedding for that key.
    pub async fn enroll(&self, image: Vec<u8>, name: &str, orientation: &str) -> Result<UpsertOutcome, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::Validation("Name is required".into()));
        }

        let embedding = self.embed(image).await?;
        let outcome = self
            .store
            .upsert(name, orientation, &embedding.values)
            .await
            .map_err(|e| {
                tracing::error!(name, orientation, error = %e, "failed to save face record");
                e
            })?;

        tracing::info!(name, orientation, ?outcome, dim = embedding.len(), "face enrolled");
        Ok(outcome)
    }

    /// Find the enrolled identity closest to the face in `image`.
    pub async fn identify(&self, image: Vec<u8>) -> Result<QueryResult, ServiceError> {
        let embedding = self.embed(image).await?;
        let records = self.store.read_all().await.map_err(|e| {
            tracing::error!(error = %e, "failed to read face records");
            e
        })?;

        let result = self.matcher.compare(&embedding, &records);
        tracing::info!(
            matched = %result.matched_name,
            score = result.similarity_score,
            is_match = result.is_match,
            candidates = records.len(),
            "match complete"
        );
        Ok(result)
    }

    pub async fn list_faces(&self) -> Result<Vec<FaceSummary>, ServiceError> {
        let records = self.store.read_all().await?;
        Ok(summarize(&records))
    }

    /// Remove every orientation enrolled for `name`.
    pub async fn delete_face(&self, name: &str) -> Result<usize, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::Validation("Name is required".into()));
        }

        match self.store.delete_by_name(name).await? {
            0 => Err(ServiceError::NotFound(name.to_string())),
            deleted => Ok(deleted),
        }
    }
}
