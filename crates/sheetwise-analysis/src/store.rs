//! Durable job records
//!
//! One pretty-printed JSON file per job under the jobs directory. Writes go to
//! a temp file that is then renamed over the record, so a crash mid-write
//! leaves the previous committed record in place. Updates to one job id are
//! serialized; updates to different ids proceed independently. A per-id lock
//! lives only while some caller holds or awaits it.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::fs;
use tracing::{debug, error, info};

use crate::error::{AnalysisError, AnalysisResult};
use crate::models::{Job, JobPatch};

/// File-per-job store
#[derive(Debug)]
pub struct JobStore {
    jobs_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobStore {
    /// Open (creating if needed) a store rooted at `jobs_dir`
    pub async fn open(jobs_dir: impl Into<PathBuf>) -> AnalysisResult<Self> {
        let jobs_dir = jobs_dir.into();
        fs::create_dir_all(&jobs_dir).await?;
        debug!("JobStore opened at {:?}", jobs_dir);

        Ok(Self {
            jobs_dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    fn job_path(&self, job_id: &str) -> AnalysisResult<PathBuf> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AnalysisError::JobNotFound(job_id.to_string()));
        }
        Ok(self.jobs_dir.join(format!("{}.json", job_id)))
    }

    fn lock_for(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Forget this id's lock unless another caller still holds or awaits it
    fn release_lock(&self, job_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks.get(job_id).map_or(false, |held| Arc::strong_count(held) == 1) {
            locks.remove(job_id);
        }
    }

    async fn read_job(job_id: &str, path: &Path) -> AnalysisResult<Job> {
        let data = match fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AnalysisError::JobNotFound(job_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    async fn write_atomic(path: &Path, job: &Job) -> AnalysisResult<()> {
        let content = serde_json::to_string_pretty(job)?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    /// Persist a new record; fails if the id is already taken
    pub async fn create(&self, job: &Job) -> AnalysisResult<()> {
        let path = self.job_path(&job.id)?;
        let lock = self.lock_for(&job.id);
        let result = {
            let _guard = lock.lock().await;
            Self::create_locked(&path, job).await
        };
        self.release_lock(&job.id, lock);
        result?;

        info!(job_id = %job.id, sheet_id = %job.sheet_id, "Job created");
        Ok(())
    }

    /// Snapshot of one record
    pub async fn get(&self, job_id: &str) -> AnalysisResult<Job> {
        let path = self.job_path(job_id)?;
        Self::read_job(job_id, &path).await
    }

    /// Merge `patch` into the record and persist it
    ///
    /// The read, merge and write happen under this id's lock. A rejected
    /// patch leaves the record untouched.
    pub async fn update(&self, job_id: &str, patch: JobPatch) -> AnalysisResult<Job> {
        let path = self.job_path(job_id)?;
        let lock = self.lock_for(job_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_locked(job_id, &path, &patch).await
        };
        self.release_lock(job_id, lock);
        let job = result?;

        debug!(
            job_id = %job_id,
            status = %job.status,
            processed = job.progress.processed,
            failed = job.progress.failed,
            "Job updated"
        );
        Ok(job)
    }

    async fn create_locked(path: &Path, job: &Job) -> AnalysisResult<()> {
        if fs::try_exists(path).await? {
            return Err(AnalysisError::JobExists(job.id.clone()));
        }
        Self::write_atomic(path, job).await
    }

    async fn apply_locked(&self, job_id: &str, path: &Path, patch: &JobPatch) -> AnalysisResult<Job> {
        let mut job = Self::read_job(job_id, path).await?;
        job.apply(patch, Utc::now())?;
        Self::write_atomic(path, &job).await?;
        Ok(job)
    }

    /// Every readable record, oldest first
    pub async fn list(&self) -> AnalysisResult<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(&self.jobs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            match fs::read_to_string(&path).await {
                Ok(data) => match serde_json::from_str::<Job>(&data) {
                    Ok(job) => jobs.push(job),
                    Err(e) => error!("Failed to parse job record {:?}: {}", path, e),
                },
                Err(e) => error!("Failed to read job record {:?}: {}", path, e),
            }
        }

        jobs.sort_by_key(|job| job.timestamps.created);
        Ok(jobs)
    }

    pub async fn delete(&self, job_id: &str) -> AnalysisResult<()> {
        let path = self.job_path(job_id)?;
        let lock = self.lock_for(job_id);
        let result = {
            let _guard = lock.lock().await;
            fs::remove_file(&path).await
        };
        self.release_lock(job_id, lock);
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AnalysisError::JobNotFound(job_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Delete terminal records that finished more than `retention` ago
    pub async fn prune_finished(&self, retention: chrono::Duration) -> AnalysisResult<usize> {
        let cutoff = Utc::now() - retention;
        let mut pruned = 0;

        for job in self.list().await? {
            let expired = job.finished_at().map(|at| at < cutoff).unwrap_or(false);
            if !expired {
                continue;
            }
            match self.delete(&job.id).await {
                Ok(()) => pruned += 1,
                Err(AnalysisError::JobNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if pruned > 0 {
            info!(pruned = pruned, "Pruned finished jobs");
        }
        Ok(pruned)
    }
}
