//! File-backed job store with temp+rename+backup write discipline.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use subgen_models::{JobId, JobState, SCHEMA_VERSION};

use crate::error::{StoreError, StoreResult};

/// Durable store holding one JSON record per job.
///
/// `save` is crash-consistent: the serialized record is written to a
/// `.tmp` sibling, the current canonical file (if any) is rotated to a
/// `.bak` sibling, and the temp is renamed into place. A crash between
/// any two steps leaves either the old canonical, the backup, or both
/// readable; `load` prefers the canonical and falls back to the backup.
#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn canonical_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn backup_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{id}.json.bak"))
    }

    fn temp_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{id}.json.tmp"))
    }

    /// Persist a brand-new job. Fails if a record already exists.
    pub async fn create(&self, job: &JobState) -> StoreResult<()> {
        let canonical = self.canonical_path(&job.id);
        if fs::try_exists(&canonical).await? {
            return Err(StoreError::AlreadyExists { id: job.id.clone() });
        }
        self.save(job).await
    }

    /// Persist the record, rotating the previous canonical file to a
    /// single backup generation.
    pub async fn save(&self, job: &JobState) -> StoreResult<()> {
        let canonical = self.canonical_path(&job.id);
        let backup = self.backup_path(&job.id);
        let temp = self.temp_path(&job.id);

        let bytes = serde_json::to_vec_pretty(job)?;
        fs::write(&temp, &bytes).await?;

        if fs::try_exists(&canonical).await? {
            fs::rename(&canonical, &backup).await?;
        }
        fs::rename(&temp, &canonical).await?;

        debug!(job_id = %job.id, stage = %job.stage, "Saved job record");
        Ok(())
    }

    /// Load a job record, falling back to the backup generation when the
    /// canonical file is missing or unreadable.
    pub async fn load(&self, id: &JobId) -> StoreResult<JobState> {
        let canonical = self.canonical_path(id);
        let backup = self.backup_path(id);

        match self.read_record(id, &canonical).await {
            Ok(job) => Ok(job),
            Err(StoreError::UnknownSchema { id, found, expected }) => {
                Err(StoreError::UnknownSchema { id, found, expected })
            }
            Err(canonical_err) => {
                let canonical_exists = fs::try_exists(&canonical).await.unwrap_or(false);
                if !fs::try_exists(&backup).await.unwrap_or(false) {
                    return Err(if canonical_exists {
                        StoreError::Corrupt { id: id.clone() }
                    } else {
                        StoreError::NotFound(id.clone())
                    });
                }
                if canonical_exists {
                    warn!(
                        job_id = %id,
                        error = %canonical_err,
                        "Canonical job record unreadable, falling back to backup"
                    );
                }
                self.read_record(id, &backup)
                    .await
                    .map_err(|e| match e {
                        StoreError::UnknownSchema { .. } => e,
                        _ => StoreError::Corrupt { id: id.clone() },
                    })
            }
        }
    }

    async fn read_record(&self, id: &JobId, path: &Path) -> StoreResult<JobState> {
        let bytes = fs::read(path).await?;
        let job: JobState = serde_json::from_slice(&bytes)?;
        if job.schema_version != SCHEMA_VERSION {
            return Err(StoreError::UnknownSchema {
                id: id.clone(),
                found: job.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(job)
    }

    /// All jobs whose stage is not terminal.
    pub async fn list_active(&self) -> StoreResult<Vec<JobState>> {
        let jobs = self.list_all().await?;
        Ok(jobs.into_iter().filter(|j| !j.stage.is_terminal()).collect())
    }

    /// Terminal jobs whose last update is older than `before`.
    pub async fn list_terminal(&self, before: DateTime<Utc>) -> StoreResult<Vec<JobState>> {
        let jobs = self.list_all().await?;
        Ok(jobs
            .into_iter()
            .filter(|j| j.stage.is_terminal() && j.updated_at < before)
            .collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<JobState>> {
        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Only canonical records; skip temp and backup siblings.
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let id = JobId::from_string(stem);
            match self.load(&id).await {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Skipping unreadable job record");
                }
            }
        }

        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    /// Remove a job record and its backup. Used by archive tooling, not
    /// by the cleanup reaper.
    pub async fn delete(&self, id: &JobId) -> StoreResult<()> {
        let canonical = self.canonical_path(id);
        if !fs::try_exists(&canonical).await? {
            return Err(StoreError::NotFound(id.clone()));
        }
        fs::remove_file(&canonical).await?;

        let backup = self.backup_path(id);
        if fs::try_exists(&backup).await? {
            fs::remove_file(&backup).await?;
        }
        Ok(())
    }
}
