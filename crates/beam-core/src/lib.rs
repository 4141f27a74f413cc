#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared data model for the beam-search image-generation orchestrator:
//! jobs, candidates, scoring, events, and the error taxonomy. No upstream
//! calls happen here — this crate is pure data plus a handful of pure
//! functions (scoring, critique building, lineage reconstruction).

pub mod candidate;
pub mod capability;
pub mod critique;
pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod metadata;
pub mod score;
pub mod usage;

pub use candidate::{Candidate, ImageRef, RankingResult};
pub use capability::{Capability, ProviderFamily};
pub use critique::{build_critique, Critique, Recommendation};
pub use error::CoreError;
pub use event::{CandidatePatch, Event, EventKind};
pub use ids::{CandidateId, JobId};
pub use job::{FaceFixOptions, Job, JobParams, JobStatus, RankingMode};
pub use metadata::{build_lineage, FinalWinner, IterationRecord, JobMetadata};
pub use score::Evaluation;
pub use usage::{CostBucket, CostTotals, Usage};
