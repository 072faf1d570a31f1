//! Nearest-neighbour matching of a query embedding against enrolled records.

use crate::types::{Embedding, FaceRecord, QueryResult, NO_MATCH_SCORE};

/// Cosine similarity a best match must reach to count as a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

/// Strategy for comparing a query embedding against the enrolled records.
pub trait Matcher {
    fn compare(&self, query: &Embedding, records: &[FaceRecord]) -> QueryResult;
}

/// Cosine similarity matcher with a fixed threshold.
///
/// Scans every record. The running best is only displaced by a strictly
/// greater score, so equal scores resolve to the record seen first.
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    threshold: f32,
}

impl CosineMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for CosineMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for CosineMatcher {
    fn compare(&self, query: &Embedding, records: &[FaceRecord]) -> QueryResult {
        let mut best_score = NO_MATCH_SCORE;
        let mut best_name: Option<&str> = None;

        for record in records {
            let Some(score) = query.similarity(&record.features) else {
                tracing::debug!(
                    name = %record.name,
                    orientation = %record.orientation,
                    dims = record.features.len(),
                    query_dims = query.len(),
                    "skipping record with incomparable embedding"
                );
                continue;
            };
            if score > best_score {
                best_score = score;
                best_name = Some(&record.name);
            }
        }

        match best_name {
            Some(name) if best_score >= self.threshold => QueryResult {
                matched_name: name.to_string(),
                similarity_score: best_score,
                is_match: true,
            },
            _ => QueryResult::unknown(best_score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNKNOWN_NAME;

    fn record(name: &str, orientation: &str, features: &[f32]) -> FaceRecord {
        FaceRecord::new(name, orientation, features.to_vec())
    }

    #[test]
    fn test_identical_embedding_matches() {
        let query = Embedding::new(vec![0.2, 0.4, -0.1]);
        let records = vec![
            record("bob", "front", &[-0.3, 0.1, 0.9]),
            record("alice", "front", &[0.2, 0.4, -0.1]),
        ];
        let result = CosineMatcher::default().compare(&query, &records);
        assert!(result.is_match);
        assert_eq!(result.matched_name, "alice");
        assert!((result.similarity_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_store_returns_sentinel() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let result = CosineMatcher::default().compare(&query, &[]);
        assert!(!result.is_match);
        assert_eq!(result.matched_name, UNKNOWN_NAME);
        assert_eq!(result.similarity_score, NO_MATCH_SCORE);
    }

    #[test]
    fn test_below_threshold_forces_unknown() {
        // bob leads, but not by enough.
        let query = Embedding::new(vec![1.0, 0.0]);
        let records = vec![record("bob", "front", &[1.0, 1.0])];
        let result = CosineMatcher::default().compare(&query, &records);
        assert!(!result.is_match);
        assert_eq!(result.matched_name, UNKNOWN_NAME);
        assert!((result.similarity_score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_score_equal_to_threshold_matches() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let records = vec![record("bob", "front", &[1.0, 1.0])];
        let score = query.similarity(&records[0].features).unwrap();
        let result = CosineMatcher::new(score).compare(&query, &records);
        assert!(result.is_match);
        assert_eq!(result.matched_name, "bob");
    }

    #[test]
    fn test_tie_resolves_to_first_record() {
        let query = Embedding::new(vec![1.0, 0.0, 0.0]);
        let records = vec![
            record("first", "front", &[2.0, 0.0, 0.0]),
            record("second", "front", &[5.0, 0.0, 0.0]),
        ];
        let result = CosineMatcher::default().compare(&query, &records);
        assert_eq!(result.matched_name, "first");
    }

    #[test]
    fn test_scaled_record_scores_identically() {
        let query = Embedding::new(vec![0.9, 0.1, 0.3]);
        let base = [0.8, 0.2, 0.35];
        let scaled: Vec<f32> = base.iter().map(|v| v * 1000.0).collect();

        let a = CosineMatcher::default().compare(&query, &[record("a", "front", &base)]);
        let b = CosineMatcher::default().compare(&query, &[record("a", "front", &scaled)]);
        assert!((a.similarity_score - b.similarity_score).abs() < 1e-6);
    }

    #[test]
    fn test_best_of_many_wins() {
        let query = Embedding::new(vec![1.0, 0.0, 0.0]);
        let records = vec![
            record("decoy1", "front", &[0.0, 1.0, 0.0]),
            record("decoy2", "front", &[0.0, 0.0, 1.0]),
            record("carol", "left", &[0.9, 0.1, 0.0]),
        ];
        let result = CosineMatcher::default().compare(&query, &records);
        assert!(result.is_match);
        assert_eq!(result.matched_name, "carol");
    }

    #[test]
    fn test_incomparable_records_are_skipped() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let records = vec![
            record("wrong-dims", "front", &[1.0, 0.0, 0.0]),
            record("zero", "front", &[0.0, 0.0]),
            record("dave", "front", &[1.0, 0.0]),
        ];
        let result = CosineMatcher::default().compare(&query, &records);
        assert_eq!(result.matched_name, "dave");
    }
}
