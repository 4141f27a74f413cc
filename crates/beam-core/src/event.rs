use serde::{Deserialize, Serialize};

use crate::candidate::ImageRef;
use crate::capability::Capability;
use crate::ids::{CandidateId, JobId};
use crate::metadata::JobMetadata;
use crate::score::Evaluation;
use crate::usage::CostTotals;

/// Incremental candidate fields. The spec permits emitting `candidate`
/// events either once (fully populated) or twice (partial, then full) per
/// candidate; receivers merge on `id`. All fields beyond `id` are optional
/// for exactly that reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidatePatch {
    /// Candidate this patch refers to.
    pub id: CandidateId,
    /// Parent candidate id, if known yet.
    pub parent_id: Option<CandidateId>,
    /// What-prompt, if known yet.
    pub what_prompt: Option<String>,
    /// How-prompt, if known yet.
    pub how_prompt: Option<String>,
    /// Combined prompt, if known yet.
    pub combined_prompt: Option<String>,
    /// Image location, if the image step has completed.
    pub image: Option<ImageRef>,
    /// Vision evaluation, if the evaluate step has completed.
    pub evaluation: Option<Evaluation>,
    /// Total score, if evaluated.
    pub total_score: Option<f32>,
}

impl CandidatePatch {
    /// A patch that carries only the id, for the earliest "candidate
    /// created" notification.
    pub fn new(id: CandidateId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Tagged sum over every event variant the bus can publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    /// Acknowledges a successful subscribe request.
    Subscribed,
    /// Incremental candidate update.
    Candidate {
        /// The candidate patch.
        candidate: CandidatePatch,
    },
    /// Iteration-level progress marker.
    Iteration {
        /// Iteration number.
        iteration: u32,
        /// Running estimated cost at the time of this marker.
        running_cost: CostTotals,
    },
    /// A ping emitted around each upstream call, and as a heartbeat during
    /// long-running calls.
    Operation {
        /// Capability the call was against.
        capability: Capability,
        /// Short human-readable description.
        message: String,
    },
    /// Progress marker for a named sub-stage (e.g. the safety retry).
    Step {
        /// Stage name, e.g. `"safety"`.
        stage: String,
        /// Stage-specific status string.
        status: String,
        /// Running estimated cost, when applicable.
        running_cost: Option<CostTotals>,
    },
    /// One candidate's rank within its iteration has been decided.
    Ranked {
        /// The iteration this rank applies to.
        iteration: u32,
        /// The ranked candidate.
        candidate_id: CandidateId,
        /// Rank within the iteration (1 = best).
        rank: u32,
    },
    /// Final cross-iteration ranking is available.
    GlobalRanking {
        /// `(candidate, global_rank)` pairs, best first.
        rankings: Vec<(CandidateId, u32)>,
    },
    /// The job completed successfully.
    Complete {
        /// The full persisted metadata record.
        metadata: Box<JobMetadata>,
    },
    /// The job was cooperatively cancelled.
    Cancelled,
    /// The job (or a subscription) failed.
    Error {
        /// Human-readable message.
        message: String,
    },
    /// Internal: this subscription dropped `skipped` events due to a slow
    /// consumer. Never surfaces to the job itself.
    Lag {
        /// Number of events dropped.
        skipped: u64,
    },
}

/// A timestamped event keyed by job id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The job this event belongs to.
    pub job_id: JobId,
    /// Wall-clock time the event was published.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// The event payload.
    pub kind: EventKind,
}

impl Event {
    /// Construct an event for `job_id`, stamped with the current time.
    pub fn new(job_id: JobId, kind: EventKind) -> Self {
        Self {
            job_id,
            timestamp: chrono::Utc::now(),
            kind,
        }
    }
}
