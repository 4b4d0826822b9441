//! Durable job registry: one JSON document holding every job record.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::job::Job;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job with name '{0}' already exists")]
    NameInUse(String),
    #[error("Job '{0}' not found")]
    NotFound(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File-backed job store. All mutations rewrite the whole document
/// atomically (temp file, fsync, rename); a single mutex serializes
/// writers within the process.
#[derive(Clone)]
pub struct JobStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new job; fails if the name is taken.
    pub async fn put(&self, job: &Job) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut jobs = self.read_document().await;
        if jobs.iter().any(|j| j.job_name == job.job_name) {
            return Err(StoreError::NameInUse(job.job_name.clone()));
        }
        jobs.push(job.clone());
        self.write_document(&jobs).await?;
        info!(job = %job.job_name, "added job to storage");
        Ok(())
    }

    /// Overwrite an existing job, preserving `created_at` and
    /// `last_run` from the prior record. Returns the stored job.
    pub async fn replace(&self, name: &str, mut job: Job) -> Result<Job, StoreError> {
        let _guard = self.lock.lock().await;
        let mut jobs = self.read_document().await;
        let Some(existing) = jobs.iter_mut().find(|j| j.job_name == name) else {
            return Err(StoreError::NotFound(name.to_string()));
        };
        job.job_name = name.to_string();
        job.created_at = existing.created_at;
        job.last_run = existing.last_run;
        *existing = job.clone();
        self.write_document(&jobs).await?;
        info!(job = %name, "updated job in storage");
        Ok(job)
    }

    pub async fn get(&self, name: &str) -> Result<Option<Job>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_document()
            .await
            .into_iter()
            .find(|j| j.job_name == name))
    }

    pub async fn list(&self) -> Result<Vec<Job>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await)
    }

    pub async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut jobs = self.read_document().await;
        let before = jobs.len();
        jobs.retain(|j| j.job_name != name);
        if jobs.len() == before {
            return Err(StoreError::NotFound(name.to_string()));
        }
        self.write_document(&jobs).await?;
        info!(job = %name, "deleted job from storage");
        Ok(())
    }

    /// Set `last_run`. A name that is no longer present is ignored:
    /// the job was deleted while its final run was in flight.
    pub async fn touch_last_run(
        &self,
        name: &str,
        t: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut jobs = self.read_document().await;
        let Some(job) = jobs.iter_mut().find(|j| j.job_name == name) else {
            debug!(job = %name, "skipping last_run update for deleted job");
            return Ok(());
        };
        job.last_run = Some(t);
        self.write_document(&jobs).await
    }

    /// Load the whole document. A missing file is an empty store; a
    /// corrupt document logs a warning and loads as empty; individual
    /// malformed records are skipped.
    async fn read_document(&self) -> Vec<Job> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), "failed to read job storage: {e}");
                return Vec::new();
            }
        };

        let records: Vec<serde_json::Value> = match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "job storage is corrupt, starting with an empty set: {e}"
                );
                return Vec::new();
            }
        };

        records
            .into_iter()
            .filter_map(|record| match serde_json::from_value::<Job>(record) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!("skipping malformed job record: {e}");
                    None
                }
            })
            .collect()
    }

    /// Write the document crash-safely: sibling temp file, fsync,
    /// rename over the target.
    async fn write_document(&self, jobs: &[Job]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(jobs)?;
        let tmp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
