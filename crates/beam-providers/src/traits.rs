use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    AnalyzeRequest, AnalyzeResponse, CombineRequest, CombineResponse, CompareResponse,
    GenerateRequest, GenerateResponse, RankCandidate, RankResponse, RefineRequest, RefineResponse,
};

/// Error surfaced by a provider call. Distinguishes connection-level
/// failures (retriable by `ServiceConnection`) from everything else.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection refused outright.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    /// Host/endpoint unreachable.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// Timed out, distinguished as a cold-start symptom rather than a
    /// semantic timeout.
    #[error("timeout (cold start suspected): {0}")]
    ColdStartTimeout(String),
    /// The provider refused on content-policy grounds.
    #[error("content policy rejection: {0}")]
    ContentPolicy(String),
    /// Any other non-retriable failure (4xx, semantic failure).
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Whether this is one of the closed set of connection-level failures
    /// `ServiceConnection` is allowed to retry.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            ProviderError::ConnectionRefused(_)
                | ProviderError::Unreachable(_)
                | ProviderError::ColdStartTimeout(_)
        )
    }

    /// Whether this is an image-provider content-policy rejection, which
    /// triggers the orchestrator's one-shot safety-retry rather than a
    /// connection-level retry.
    pub fn is_content_policy(&self) -> bool {
        matches!(self, ProviderError::ContentPolicy(_))
    }
}

/// Refines and combines prompts.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Refine one dimension (what/how) of a candidate's prompt.
    async fn refine(&self, req: RefineRequest) -> Result<RefineResponse, ProviderError>;

    /// Combine a what-prompt and how-prompt into one image prompt.
    async fn combine(&self, req: CombineRequest) -> Result<CombineResponse, ProviderError>;
}

/// Generates one image per call.
#[async_trait]
pub trait ImageGenProvider: Send + Sync {
    /// Generate a single image.
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    /// Probe for the optional batch capability, per the capability-probe
    /// pattern (no runtime property detection).
    fn as_batch(&self) -> Option<&dyn BatchImageGenProvider> {
        None
    }
}

/// Optional capability: generate many images in one call, preserving input
/// order in the output.
#[async_trait]
pub trait BatchImageGenProvider: ImageGenProvider {
    /// Generate a batch of images, aligned with `reqs` by index.
    async fn generate_batch(
        &self,
        reqs: Vec<GenerateRequest>,
    ) -> Result<Vec<Result<GenerateResponse, ProviderError>>, ProviderError>;
}

/// Scores one candidate image against the user prompt.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Analyze one image, returning alignment/aesthetic scores and a
    /// caption. Must validate ranges before returning.
    async fn analyze(&self, req: AnalyzeRequest) -> Result<AnalyzeResponse, ProviderError>;
}

/// Hooks invoked while a `rank` call makes progress, for heartbeat/UI use.
pub type RankProgressHook = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Pairwise and tournament comparison between candidate images.
#[async_trait]
pub trait VLMProvider: Send + Sync {
    /// Compare two images, returning the winner and per-side ranks.
    async fn compare(
        &self,
        image_a: &str,
        image_b: &str,
        prompt: &str,
    ) -> Result<CompareResponse, ProviderError>;

    /// Run a full tournament over `candidates` with the given ensemble
    /// size. `graceful_degradation` controls whether a failed pair is
    /// recorded as undecided rather than aborting the whole call.
    async fn rank(
        &self,
        candidates: &[RankCandidate],
        prompt: &str,
        ensemble_size: u32,
        graceful_degradation: bool,
        on_progress: Option<RankProgressHook>,
    ) -> Result<RankResponse, ProviderError>;
}
