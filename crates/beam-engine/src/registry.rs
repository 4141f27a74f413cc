use std::sync::Mutex;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use beam_core::{Job, JobId, JobParams, JobStatus};

/// An entry in the pending-jobs index, used by the resumption protocol to
/// describe jobs that are currently running.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub job_id: JobId,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub params: JobParams,
}

struct Entry {
    job: Mutex<Job>,
    cancel: CancellationToken,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Owns every job record for the process's lifetime and exposes the
/// `create`/`get`/`cancel`/`list` operations plus the pending-jobs index.
/// Active jobs are kept in memory; nothing here touches disk.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, std::sync::Arc<Entry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job in `Pending` status and return its cancellation
    /// token, to be handed to the orchestrator task that will drive it.
    pub fn create(&self, params: JobParams) -> (JobId, CancellationToken) {
        let job = Job::new(params);
        let id = job.id;
        let cancel = CancellationToken::new();
        self.jobs.insert(
            id,
            std::sync::Arc::new(Entry {
                job: Mutex::new(job),
                cancel: cancel.clone(),
                task: Mutex::new(None),
            }),
        );
        (id, cancel)
    }

    /// Attach the spawned orchestrator task so the registry can track it
    /// (e.g. for forced shutdown in tests). Dropping the registry does not
    /// abort tasks automatically.
    pub fn attach_task(&self, id: JobId, handle: tokio::task::JoinHandle<()>) {
        if let Some(entry) = self.jobs.get(&id) {
            *entry.task.lock().expect("job registry poisoned") = Some(handle);
        }
    }

    /// Snapshot of a job's current record, or `None` if unknown.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs
            .get(&id)
            .map(|e| e.job.lock().expect("job registry poisoned").clone())
    }

    /// Whether `id` is a known job.
    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    /// Update a job's status in place.
    pub fn set_status(&self, id: JobId, status: JobStatus) {
        if let Some(entry) = self.jobs.get(&id) {
            entry.job.lock().expect("job registry poisoned").status = status;
        }
    }

    /// Cooperatively cancel a job: trips its token and marks it cancelled.
    /// A no-op (returns `false`) if the job is unknown or already terminal.
    pub fn cancel(&self, id: JobId) -> bool {
        let Some(entry) = self.jobs.get(&id) else {
            return false;
        };
        let mut job = entry.job.lock().expect("job registry poisoned");
        if is_terminal(job.status) {
            return false;
        }
        job.status = JobStatus::Cancelled;
        entry.cancel.cancel();
        true
    }

    /// The cancellation token for a job, if known.
    pub fn cancel_token(&self, id: JobId) -> Option<CancellationToken> {
        self.jobs.get(&id).map(|e| e.cancel.clone())
    }

    /// Snapshot of every job the registry knows about.
    pub fn list(&self) -> Vec<Job> {
        self.jobs
            .iter()
            .map(|e| e.job.lock().expect("job registry poisoned").clone())
            .collect()
    }

    /// Jobs currently `Running`, for the resumption protocol.
    pub fn pending(&self) -> Vec<PendingEntry> {
        self.jobs
            .iter()
            .filter_map(|e| {
                let job = e.job.lock().expect("job registry poisoned");
                if job.status == JobStatus::Running {
                    Some(PendingEntry {
                        job_id: job.id,
                        start_time: job.created_at,
                        params: job.params.clone(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

fn is_terminal(status: JobStatus) -> bool {
    matches!(
        status,
        JobStatus::Cancelled | JobStatus::Failed | JobStatus::Complete
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use beam_core::RankingMode;

    fn params() -> JobParams {
        JobParams {
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
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        let registry = JobRegistry::new();
        let (id, _cancel) = registry.create(params());
        let job = registry.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn cancel_unknown_job_is_a_no_op() {
        let registry = JobRegistry::new();
        assert!(!registry.cancel(JobId::new()));
    }

    #[test]
    fn cancel_terminal_job_is_a_no_op() {
        let registry = JobRegistry::new();
        let (id, _) = registry.create(params());
        registry.set_status(id, JobStatus::Complete);
        assert!(!registry.cancel(id));
    }

    #[test]
    fn cancel_trips_the_token_and_sets_status() {
        let registry = JobRegistry::new();
        let (id, cancel) = registry.create(params());
        registry.set_status(id, JobStatus::Running);
        assert!(registry.cancel(id));
        assert!(cancel.is_cancelled());
        assert_eq!(registry.get(id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn pending_only_lists_running_jobs() {
        let registry = JobRegistry::new();
        let (id_a, _) = registry.create(params());
        let (id_b, _) = registry.create(params());
        registry.set_status(id_a, JobStatus::Running);
        registry.set_status(id_b, JobStatus::Complete);

        let pending = registry.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, id_a);
    }
}
