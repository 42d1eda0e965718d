//! Scratch directory partitioning.
//!
//! Every job owns one partition under the scratch root; no task writes
//! outside its job's partition. Segments land in `segments/`, per-unit
//! cue text in `subs/`.

use std::path::{Path, PathBuf};

use subgen_models::JobId;
use tokio::fs;

use crate::error::MediaResult;

/// Scratch space root with per-job partitions.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The job's partition directory.
    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Directory holding the job's extracted segment clips.
    pub fn segments_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join("segments")
    }

    /// Directory holding the job's per-unit cue text files.
    pub fn subs_dir(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join("subs")
    }

    /// Create the job partition and its subdirectories.
    pub async fn ensure(&self, id: &JobId) -> MediaResult<PathBuf> {
        let dir = self.job_dir(id);
        fs::create_dir_all(self.segments_dir(id)).await?;
        fs::create_dir_all(self.subs_dir(id)).await?;
        Ok(dir)
    }

    /// Recursively remove the job partition. Missing partitions are not
    /// an error.
    pub async fn remove(&self, id: &JobId) -> MediaResult<()> {
        let dir = self.job_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Free bytes available on the filesystem holding the scratch root.
    pub fn available_space(&self) -> MediaResult<u64> {
        Ok(fs2::available_space(&self.root)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_partition_lifecycle() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let id = JobId::new();

        scratch.ensure(&id).await.unwrap();
        assert!(scratch.segments_dir(&id).exists());
        assert!(scratch.subs_dir(&id).exists());

        tokio::fs::write(scratch.subs_dir(&id).join("0_eng.srt"), "x")
            .await
            .unwrap();

        scratch.remove(&id).await.unwrap();
        assert!(!scratch.job_dir(&id).exists());

        // Removing twice is fine.
        scratch.remove(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_partitions_are_disjoint() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let a = JobId::new();
        let b = JobId::new();

        scratch.ensure(&a).await.unwrap();
        scratch.ensure(&b).await.unwrap();
        scratch.remove(&a).await.unwrap();

        assert!(scratch.job_dir(&b).exists());
    }
}
