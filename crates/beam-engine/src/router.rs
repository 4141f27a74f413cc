use std::sync::Arc;

use tracing::info;

use beam_core::{CoreError, Event, EventKind, JobId, JobParams};
use beam_events::{EventBus, Subscription};

use crate::metadata::Persist;
use crate::orchestrator::Orchestrator;
use crate::providers::ProviderSet;
use crate::registry::JobRegistry;
use crate::upstream::UpstreamContext;

/// Response shape for a successful job submission: `{jobId, status, params}`.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: &'static str,
    pub params: JobParams,
}

/// Everything a caller needs to hand a submitted job to a running
/// orchestrator task. One instance is shared across every submission in a
/// process.
#[derive(Clone)]
pub struct Router {
    registry: Arc<JobRegistry>,
    bus: Arc<EventBus>,
    persist: Arc<dyn Persist>,
    upstream: Arc<UpstreamContext>,
    providers: ProviderSet,
}

impl Router {
    pub fn new(
        registry: Arc<JobRegistry>,
        bus: Arc<EventBus>,
        persist: Arc<dyn Persist>,
        upstream: Arc<UpstreamContext>,
        providers: ProviderSet,
    ) -> Self {
        Self {
            registry,
            bus,
            persist,
            upstream,
            providers,
        }
    }

    /// Validate and admit a job submission. Validation errors are returned
    /// synchronously and no job is created; on success the orchestrator is
    /// spawned immediately and tracked in the registry.
    pub fn submit_job(&self, params: JobParams) -> Result<SubmitResponse, CoreError> {
        params.validate()?;

        let (job_id, cancel) = self.registry.create(params.clone());
        let orchestrator = Orchestrator::new(
            job_id,
            params.clone(),
            cancel,
            self.providers.clone(),
            self.upstream.clone(),
            self.bus.clone(),
            self.persist.clone(),
            self.registry.clone(),
        );
        let handle = tokio::spawn(orchestrator.run());
        self.registry.attach_task(job_id, handle);

        info!(%job_id, "job submitted");
        Ok(SubmitResponse {
            job_id,
            status: "started",
            params,
        })
    }

    /// Open a subscription to a job's event stream. `Err` for an unknown
    /// job id, to be surfaced by the transport as `error{message}`.
    /// Otherwise the subscriber's first event is a `subscribed`
    /// acknowledgement.
    pub fn subscribe(&self, job_id: JobId) -> Result<Subscription, CoreError> {
        if !self.registry.contains(job_id) {
            return Err(CoreError::Fatal(format!("unknown job id {job_id}")));
        }
        let subscription = self.bus.subscribe(job_id);
        self.bus.publish(Event::new(job_id, EventKind::Subscribed));
        Ok(subscription)
    }

    /// Cooperatively cancel a job. Returns `false` for an unknown or
    /// already-terminal job, matching the no-op requirement for cancelling
    /// a job that has already reached a terminal state.
    pub fn cancel(&self, job_id: JobId) -> bool {
        self.registry.cancel(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use beam_core::RankingMode;
    use beam_providers::stub::{StubImageGenProvider, StubTextProvider, StubVisionProvider, StubVlmProvider};
    use beam_upstream::{GpuCoordinator, PricingTable};

    use crate::metadata::{DefaultPathBuilder, FilesystemPersist};

    fn router(tmp: &std::path::Path) -> Router {
        let registry = Arc::new(JobRegistry::new());
        let bus = Arc::new(EventBus::default());
        let persist: Arc<dyn Persist> =
            Arc::new(FilesystemPersist::new(DefaultPathBuilder::new(tmp.to_path_buf())));
        let upstream = Arc::new(UpstreamContext::new(
            Arc::new(GpuCoordinator::new(None)),
            PricingTable::default(),
        ));
        let providers = ProviderSet {
            text: Arc::new(StubTextProvider::default()),
            image: Arc::new(StubImageGenProvider::default()),
            vision: Arc::new(StubVisionProvider::default()),
            vlm: Arc::new(StubVlmProvider::default()),
        };
        Router::new(registry, bus, persist, upstream, providers)
    }

    fn params() -> JobParams {
        JobParams {
            prompt: "mountains".into(),
            n: 2,
            m: 1,
            max_iterations: 1,
            alpha: 0.7,
            temperature: 0.8,
            descriptiveness: 2,
            ensemble_size: 1,
            ranking_mode: RankingMode::Score,
            models: HashMap::new(),
            provider_families: HashMap::new(),
            face_fix: None,
            provider_options: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn rejects_invalid_submit_without_creating_a_job() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        let mut bad = params();
        bad.n = 3;
        assert!(router.submit_job(bad).is_err());
    }

    #[tokio::test]
    async fn subscribe_to_unknown_job_errors() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        assert!(router.subscribe(JobId::new()).is_err());
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        assert!(!router.cancel(JobId::new()));
    }

    #[tokio::test]
    async fn submit_then_subscribe_then_cancel_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        let submitted = router.submit_job(params()).unwrap();
        assert_eq!(submitted.status, "started");

        let mut sub = router.subscribe(submitted.job_id).unwrap();
        let first = sub.next().await.unwrap();
        assert!(matches!(first.kind, EventKind::Subscribed));

        assert!(router.cancel(submitted.job_id));
    }
}
