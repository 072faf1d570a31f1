use serde::{Deserialize, Serialize};

/// Name reported when no enrolled face clears the match threshold.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Score reported when no record could be compared (e.g. an empty store).
pub const NO_MATCH_SCORE: f32 = -1.0;

/// Bounding box for a detected face, in source image pixels.
///
/// Detectors may report boxes that extend past the image edges; callers
/// clamp before cropping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Box area; degenerate (negative extent) boxes have zero area.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
///
/// Values are kept exactly as the extractor produced them. Normalization only
/// happens inside [`cosine_similarity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity against a stored feature vector.
    ///
    /// See [`cosine_similarity`].
    pub fn similarity(&self, other: &[f32]) -> Option<f32> {
        cosine_similarity(&self.values, other)
    }
}

/// L2-normalize both vectors independently and return their dot product.
///
/// Returns `None` when the dimensions differ or either vector has zero
/// (or non-finite) norm, since no meaningful score exists.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if !(norm_a.is_finite() && norm_b.is_finite()) || norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let dot: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x / norm_a) * (y / norm_b))
        .sum();

    // Rounding can push unit-vector products slightly past ±1.
    Some(dot.clamp(-1.0, 1.0))
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// One enrolled face variant for one identity.
///
/// `(name, orientation)` is the natural key. `backend_id` is the identifier
/// assigned by a document store and is never written to the local file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub name: String,
    pub orientation: String,
    pub features: Vec<f32>,
    #[serde(skip)]
    pub backend_id: Option<String>,
}

impl FaceRecord {
    pub fn new(name: impl Into<String>, orientation: impl Into<String>, features: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            orientation: orientation.into(),
            features,
            backend_id: None,
        }
    }

    /// True if this record is stored under the given `(name, orientation)` key.
    pub fn has_key(&self, name: &str, orientation: &str) -> bool {
        self.name == name && self.orientation == orientation
    }
}

/// Outcome of matching a query embedding against the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub matched_name: String,
    pub similarity_score: f32,
    pub is_match: bool,
}

impl QueryResult {
    /// A non-match carrying the best score that was seen.
    pub fn unknown(similarity_score: f32) -> Self {
        Self {
            matched_name: UNKNOWN_NAME.to_string(),
            similarity_score,
            is_match: false,
        }
    }
}
