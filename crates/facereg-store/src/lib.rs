//! facereg-store: persistence for enrolled face records.
//!
//! Two interchangeable backends implement [`RecordStore`]: a Firestore
//! collection reached over its REST API, and a local newline-delimited JSON
//! file. The backend is chosen once at startup by [`open_store`].

pub mod firestore;
pub mod local;

#[cfg(test)]
mod fake_firestore;

use async_trait::async_trait;
use facereg_core::FaceRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use firestore::{FirestoreConfig, FirestoreStore};
pub use local::LocalFileStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("malformed document {name}: {reason}")]
    Malformed { name: String, reason: String },
}

/// Which backend holds the records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Firestore,
    Local,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Firestore => "firestore",
            Backend::Local => "local",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an upsert replaced an existing record or added a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Storage for face records keyed by `(name, orientation)`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn backend(&self) -> Backend;

    /// Every live record, in backend order.
    async fn read_all(&self) -> Result<Vec<FaceRecord>, StoreError>;

    /// Replace the features of the `(name, orientation)` record, or add it.
    async fn upsert(
        &self,
        name: &str,
        orientation: &str,
        features: &[f32],
    ) -> Result<UpsertOutcome, StoreError>;

    /// Remove every record for `name`, returning how many were removed.
    async fn delete_by_name(&self, name: &str) -> Result<usize, StoreError>;
}

/// Open the authoritative store.
///
/// A configured Firestore project wins if it answers a one-document listing;
/// otherwise records live in the local file at `local_path`.
pub async fn open_store(firestore: Option<FirestoreConfig>, local_path: PathBuf) -> Arc<dyn RecordStore> {
    match firestore {
        Some(config) => {
            let project = config.project_id.clone();
            match FirestoreStore::connect(config).await {
                Ok(store) => {
                    tracing::info!(project = %project, "using Firestore record store");
                    return Arc::new(store);
                }
                Err(e) => {
                    tracing::warn!(project = %project, error = %e, "Firestore unavailable; falling back to local file store");
                }
            }
        }
        None => tracing::info!("no Firestore project configured"),
    }

    tracing::info!(path = %local_path.display(), "using local file record store");
    Arc::new(LocalFileStore::new(local_path))
}

/// Enrolled orientations for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaceSummary {
    pub name: String,
    pub orientations: Vec<String>,
    pub count: usize,
}

/// Group records by name, keeping first-seen order for names and orientations.
pub fn summarize(records: &[FaceRecord]) -> Vec<FaceSummary> {
    let mut summaries: Vec<FaceSummary> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in records.iter().filter(|r| !r.name.is_empty()) {
        let slot = *index.entry(record.name.as_str()).or_insert_with(|| {
            summaries.push(FaceSummary {
                name: record.name.clone(),
                orientations: Vec::new(),
                count: 0,
            });
            summaries.len() - 1
        });
        let summary = &mut summaries[slot];
        summary.orientations.push(record.orientation.clone());
        summary.count += 1;
    }

    summaries
}
