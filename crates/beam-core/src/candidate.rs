use serde::{Deserialize, Serialize};

use crate::ids::CandidateId;
use crate::score::Evaluation;

/// Where a generated image lives. Exactly one variant is populated once the
/// image step for a candidate has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ImageRef {
    /// A remotely hosted image.
    Url { url: String },
    /// A locally written image path. The core never writes the bytes
    /// themselves, only records the path a provider returned.
    LocalPath { path: String },
}

/// Per-candidate ranking outcome, populated by the RANK stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingResult {
    /// Rank within this candidate's iteration (1 = best).
    pub iteration_rank: Option<u32>,
    /// Rank across all iterations, assigned at FINALIZE.
    pub global_rank: Option<u32>,
    /// Whether this candidate tied with another at the same rank.
    pub tie: bool,
    /// Human-readable justification.
    pub reason: String,
    /// Strengths noted by the evaluator (or tournament winners).
    pub strengths: Vec<String>,
    /// Weaknesses noted by the evaluator (or tournament losers).
    pub weaknesses: Vec<String>,
    /// Tournament wins, if ranking_mode was Vlm.
    pub wins: u32,
    /// Total pairs this candidate participated in.
    pub total_pairs: u32,
}

/// One image candidate produced during EXPAND and scored during
/// EVALUATE/RANK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// `i<iteration>c<ordinal>` identifier.
    pub id: CandidateId,
    /// Iteration this candidate belongs to.
    pub iteration: u32,
    /// Ordinal within the iteration.
    pub ordinal: u32,
    /// Parent candidate id; `None` only for iteration 0.
    pub parent_id: Option<CandidateId>,
    /// Content-refinement prompt.
    pub what_prompt: String,
    /// Style-refinement prompt.
    pub how_prompt: String,
    /// Combined prompt sent to the image generator.
    pub combined_prompt: String,
    /// Generated image location, once available.
    pub image: Option<ImageRef>,
    /// Vision evaluation, once available.
    pub evaluation: Option<Evaluation>,
    /// `alpha`-weighted total score, once evaluated.
    pub total_score: Option<f32>,
    /// Ranking outcome, once ranked.
    pub ranking: RankingResult,
    /// Whether this candidate survived into the next generation.
    pub survived: bool,
}

impl Candidate {
    /// Construct a fresh, unscored candidate.
    pub fn new(
        iteration: u32,
        ordinal: u32,
        parent_id: Option<CandidateId>,
        what_prompt: String,
        how_prompt: String,
        combined_prompt: String,
    ) -> Self {
        Self {
            id: CandidateId::new(iteration, ordinal),
            iteration,
            ordinal,
            parent_id,
            what_prompt,
            how_prompt,
            combined_prompt,
            image: None,
            evaluation: None,
            total_score: None,
            ranking: RankingResult::default(),
            survived: false,
        }
    }

    /// Record a failure: mark as not survived and append an error weakness.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.survived = false;
        self.ranking.weaknesses.push(reason.into());
    }
}
