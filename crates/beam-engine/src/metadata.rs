use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use beam_core::{Job, JobMetadata};

/// Error surfaced by a [`Persist`] implementation.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to write metadata for job {job_id}: {source}")]
    Io {
        job_id: beam_core::JobId,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize metadata for job {job_id}: {source}")]
    Serialize {
        job_id: beam_core::JobId,
        #[source]
        source: serde_json::Error,
    },
}

/// Injected persistence contract for the FINALIZE stage. The core never
/// decides where image bytes live; it only ever writes the metadata
/// record itself, through this trait.
#[async_trait]
pub trait Persist: Send + Sync {
    async fn save_metadata(&self, job: &Job, metadata: &JobMetadata) -> Result<(), PersistError>;
}

/// Builds the on-disk path for a job's metadata file. The default
/// convention is `<outputDir>/<YYYY-MM-DD>/<sessionId>/metadata.json`,
/// with `sessionId` formatted as `ses-<HHMMSS>`; callers may inject a
/// different `PathBuilder` without changing the orchestrator.
pub trait PathBuilder: Send + Sync {
    fn metadata_path(&self, job: &Job) -> PathBuf;
}

/// The default path convention.
pub struct DefaultPathBuilder {
    pub output_dir: PathBuf,
}

impl DefaultPathBuilder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl PathBuilder for DefaultPathBuilder {
    fn metadata_path(&self, job: &Job) -> PathBuf {
        let date = job.created_at.format("%Y-%m-%d");
        let session_id = format!("ses-{}", job.created_at.format("%H%M%S"));
        self.output_dir
            .join(date.to_string())
            .join(session_id)
            .join("metadata.json")
    }
}

/// A [`Persist`] implementation that writes the metadata record as JSON to
/// the path a [`PathBuilder`] produces, creating parent directories as
/// needed.
pub struct FilesystemPersist<P: PathBuilder> {
    path_builder: P,
}

impl<P: PathBuilder> FilesystemPersist<P> {
    pub fn new(path_builder: P) -> Self {
        Self { path_builder }
    }
}

#[async_trait]
impl<P: PathBuilder> Persist for FilesystemPersist<P> {
    async fn save_metadata(&self, job: &Job, metadata: &JobMetadata) -> Result<(), PersistError> {
        let path = self.path_builder.metadata_path(job);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| PersistError::Io {
                    job_id: job.id,
                    source,
                })?;
        }
        let json = serde_json::to_vec_pretty(metadata).map_err(|source| PersistError::Serialize {
            job_id: job.id,
            source,
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| PersistError::Io {
                job_id: job.id,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_core::{CostTotals, JobParams, JobStatus, RankingMode};
    use std::collections::HashMap;

    fn job() -> Job {
        Job::new(JobParams {
            prompt: "mountains".into(),
            n: 4,
            m: 2,
            max_iterations: 2,
            alpha: 0.7,
            temperature: 0.8,
            descriptiveness: 2,
            ensemble_size: 3,
            ranking_mode: RankingMode::Score,
            models: HashMap::new(),
            provider_families: HashMap::new(),
            face_fix: None,
            provider_options: serde_json::Value::Null,
        })
    }

    #[test]
    fn default_path_matches_convention() {
        let mut j = job();
        j.created_at = "2026-07-31T14:05:06Z".parse().unwrap();
        let builder = DefaultPathBuilder::new("/tmp/beam-out");
        let path = builder.metadata_path(&j);
        assert_eq!(
            path,
            PathBuf::from("/tmp/beam-out/2026-07-31/ses-140506/metadata.json")
        );
    }

    #[tokio::test]
    async fn filesystem_persist_writes_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut j = job();
        j.status = JobStatus::Complete;
        j.created_at = "2026-07-31T14:05:06Z".parse().unwrap();

        let persist = FilesystemPersist::new(DefaultPathBuilder::new(dir.path()));
        let metadata = JobMetadata {
            user_prompt: j.params.prompt.clone(),
            config: j.params.clone(),
            iterations: vec![],
            final_winner: None,
            lineage: vec![],
            costs: CostTotals::default(),
            status: "complete".to_string(),
            errors: vec![],
        };

        persist.save_metadata(&j, &metadata).await.unwrap();
        let path = DefaultPathBuilder::new(dir.path()).metadata_path(&j);
        let contents = tokio::fs::read_to_string(path).await.unwrap();
        assert!(contents.contains("mountains"));
    }
}
