//! facereg-core: face enrollment and matching engine.
//!
//! Decodes uploaded images, locates the most prominent face with SCRFD,
//! extracts an ArcFace embedding and matches it against enrolled records by
//! cosine similarity. Both models run via ONNX Runtime on the CPU.

pub mod crop;
pub mod decode;
pub mod detector;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use decode::{DecodeError, ImageDecoder};
pub use detector::FaceDetector;
pub use matcher::{CosineMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use pipeline::{EmbeddingExtractor, FaceLocator, FacePipeline, PipelineError};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Embedding, FaceRecord, QueryResult, UNKNOWN_NAME};

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}
