//! Persistence backends for job documents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use fleetrun_core::{CoreError, JobId};

use super::JobEntry;

/// Durable storage for job documents.
///
/// A document holds a job together with all of its tasks, so a single
/// `save` is the unit of atomicity.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write the current state of one job.
    async fn save(&self, entry: &JobEntry) -> Result<(), CoreError>;

    /// Read every stored job.
    async fn load_all(&self) -> Result<Vec<JobEntry>, CoreError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Keeps documents in process memory. State is lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    documents: Mutex<HashMap<JobId, JobEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn save(&self, entry: &JobEntry) -> Result<(), CoreError> {
        self.documents
            .lock()
            .await
            .insert(entry.job.id.clone(), entry.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<JobEntry>, CoreError> {
        Ok(self.documents.lock().await.values().cloned().collect())
    }
}

// ============================================================================
// File backend
// ============================================================================

/// One pretty-printed JSON document per job under `<root>/jobs/`.
///
/// Writes go to `<job_id>.json.tmp` first and are renamed into place, so a
/// crash mid-write leaves the previous document intact.
pub struct FileBackend {
    jobs_dir: PathBuf,
}

impl FileBackend {
    /// Open (and create if needed) the document directory below `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, CoreError> {
        let jobs_dir = root.as_ref().join("jobs");
        tokio::fs::create_dir_all(&jobs_dir).await.map_err(|e| {
            CoreError::Storage(format!("Failed to create {}: {}", jobs_dir.display(), e))
        })?;
        Ok(Self { jobs_dir })
    }

    fn document_path(&self, job_id: &JobId) -> PathBuf {
        self.jobs_dir.join(format!("{job_id}.json"))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn save(&self, entry: &JobEntry) -> Result<(), CoreError> {
        let path = self.document_path(&entry.job.id);
        let tmp_path = path.with_extension("json.tmp");

        let json = serde_json::to_vec_pretty(entry)
            .map_err(|e| CoreError::Storage(format!("Failed to serialize job: {e}")))?;

        tokio::fs::write(&tmp_path, json).await.map_err(|e| {
            CoreError::Storage(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            CoreError::Storage(format!(
                "Failed to rename {} to {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;

        debug!(job_id = %entry.job.id, path = %path.display(), "Job document written");
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<JobEntry>, CoreError> {
        let mut dir = tokio::fs::read_dir(&self.jobs_dir).await.map_err(|e| {
            CoreError::Storage(format!("Failed to read {}: {}", self.jobs_dir.display(), e))
        })?;

        let mut entries = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                CoreError::Storage(format!("Failed to read {}: {}", path.display(), e))
            })?;
            match serde_json::from_slice::<JobEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable job document");
                }
            }
        }

        Ok(entries)
    }
}
