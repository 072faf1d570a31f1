//! Local file backend: one JSON record per line.
//!
//! Every mutation reads the whole file, edits it in memory and rewrites it.
//! Mutations are serialized by a per-store lock; the rewrite goes through a
//! sibling temp file and a rename so `read_all` never sees a partial file.

use crate::{Backend, RecordStore, StoreError, UpsertOutcome};
use async_trait::async_trait;
use facereg_core::FaceRecord;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct LocalFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<FaceRecord>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_records(&contents, &self.path))
    }

    async fn persist(&self, records: &[FaceRecord]) -> Result<(), StoreError> {
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = staging_path(&self.path);
        let written = match tokio::fs::write(&staging, out).await {
            Ok(()) => tokio::fs::rename(&staging, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %staging.display(), error = %cleanup, "failed to remove staging file");
                }
            }
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for LocalFileStore {
    fn backend(&self) -> Backend {
        Backend::Local
    }

    async fn read_all(&self) -> Result<Vec<FaceRecord>, StoreError> {
        self.load().await
    }

    async fn upsert(
        &self,
        name: &str,
        orientation: &str,
        features: &[f32],
    ) -> Result<UpsertOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;

        let outcome = match records.iter_mut().find(|r| r.has_key(name, orientation)) {
            Some(existing) => {
                existing.features = features.to_vec();
                UpsertOutcome::Updated
            }
            None => {
                records.push(FaceRecord::new(name, orientation, features.to_vec()));
                UpsertOutcome::Created
            }
        };

        self.persist(&records).await?;
        tracing::info!(name, orientation, ?outcome, total = records.len(), "local record upserted");
        Ok(outcome)
    }

    async fn delete_by_name(&self, name: &str) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;

        let before = records.len();
        records.retain(|r| r.name != name);
        let deleted = before - records.len();

        if deleted > 0 {
            self.persist(&records).await?;
        }
        tracing::info!(name, deleted, "local records deleted");
        Ok(deleted)
    }
}

/// Parse newline-delimited records, skipping lines that are not a complete
/// record.
fn parse_records(contents: &str, path: &Path) -> Vec<FaceRecord> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str::<FaceRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = i + 1,
                    error = %e,
                    "skipping malformed face record"
                );
                None
            }
        })
        .collect()
}

fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "features.txt".to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}
