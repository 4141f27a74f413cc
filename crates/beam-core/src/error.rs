use thiserror::Error;

/// Error taxonomy shared across the orchestration core.
///
/// Each variant maps to one of the failure classes from the error handling
/// design: validation failures never create a job, upstream failures scope
/// to a candidate or a pair, and `Fatal` is the catch-all for anything the
/// state machine did not anticipate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A job submit request failed validation; no job was created.
    #[error("validation failed for field `{field}`: {reason}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A required credential or endpoint was missing at provider construction.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// An upstream connection failed after retries were exhausted.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The image provider refused to generate an image (content policy).
    #[error("content policy rejection: {0}")]
    ContentPolicy(String),

    /// Fewer than `m` candidates survived an iteration.
    #[error("insufficient candidates: needed {needed}, got {got}")]
    InsufficientCandidates {
        /// Minimum candidates required (the job's `m`).
        needed: usize,
        /// Candidates that actually survived.
        got: usize,
    },

    /// The job was cancelled cooperatively.
    #[error("job cancelled")]
    Cancelled,

    /// Any other unhandled error in the state machine.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    /// True for errors that are scoped to one candidate and should not abort
    /// the iteration as long as enough candidates remain.
    pub fn is_candidate_scoped(&self) -> bool {
        matches!(
            self,
            CoreError::UpstreamUnavailable(_) | CoreError::ContentPolicy(_)
        )
    }
}
