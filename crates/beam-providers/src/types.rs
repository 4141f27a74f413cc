use beam_core::{Evaluation, Usage};
use serde::{Deserialize, Serialize};

/// Which part of the prompt a refinement call is steering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Content refinement.
    What,
    /// Style refinement.
    How,
}

/// Request to refine one dimension of a candidate's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineRequest {
    /// The prompt to refine (parent's combined prompt, or the raw user
    /// prompt at iteration 0).
    pub prompt: String,
    /// Which dimension this call is steering.
    pub dimension: Dimension,
    /// Structured critique from the parent, when `iteration > 0`.
    pub critique: Option<beam_core::Critique>,
    /// The original user prompt, for grounding.
    pub user_prompt: Option<String>,
    /// The prior round's refined text for this dimension, if any.
    pub prior_result: Option<String>,
}

/// Result of a refinement call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineResponse {
    /// The refined prompt, with conversational preamble/wrapper text
    /// already stripped.
    pub refined_prompt: String,
    /// Usage recorded for this call.
    pub usage: Usage,
}

/// Descriptiveness level for prompt combination (data table, not branches).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Descriptiveness {
    /// Terse combination.
    Concise = 1,
    /// Balanced combination.
    Balanced = 2,
    /// Maximally descriptive combination.
    Rich = 3,
}

impl Descriptiveness {
    /// Parse from the raw `1..=3` wire value.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Concise),
            2 => Some(Self::Balanced),
            3 => Some(Self::Rich),
            _ => None,
        }
    }

    /// The combine-prompt instruction text for this level. A data table,
    /// not branching code, per the design note on descriptiveness.
    pub fn instruction(self) -> &'static str {
        match self {
            Descriptiveness::Concise => "Combine tersely, favoring brevity over detail.",
            Descriptiveness::Balanced => "Combine with a balanced level of descriptive detail.",
            Descriptiveness::Rich => "Combine richly, preserving as much descriptive detail as possible.",
        }
    }
}

/// Sentinel used for null/empty combine inputs.
pub const NONE_SENTINEL: &str = "(none)";

/// Request to combine a what-prompt and how-prompt into one image prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombineRequest {
    /// Content-refined prompt, or [`NONE_SENTINEL`] if absent.
    pub what: String,
    /// Style-refined prompt, or [`NONE_SENTINEL`] if absent.
    pub how: String,
    /// Descriptiveness level.
    pub descriptiveness: Descriptiveness,
}

impl CombineRequest {
    /// Build a request, substituting [`NONE_SENTINEL`] for null/empty
    /// inputs as required by the provider contract.
    pub fn new(what: Option<&str>, how: Option<&str>, descriptiveness: Descriptiveness) -> Self {
        let normalize = |s: Option<&str>| match s {
            Some(s) if !s.trim().is_empty() => s.to_string(),
            _ => NONE_SENTINEL.to_string(),
        };
        Self {
            what: normalize(what),
            how: normalize(how),
            descriptiveness,
        }
    }
}

/// Result of a combine call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombineResponse {
    /// The combined prompt.
    pub combined_prompt: String,
    /// Usage recorded for this call.
    pub usage: Usage,
}

/// LoRA reference passed through to the image provider verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraRef {
    /// Identifier or path of the LoRA weights.
    pub id: String,
    /// Blend weight.
    pub weight: f32,
}

/// Request to generate one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Combined prompt.
    pub prompt: String,
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
    /// Diffusion steps.
    pub steps: u32,
    /// Classifier-free guidance scale.
    pub guidance: f32,
    /// Optional fixed seed.
    pub seed: Option<u64>,
    /// Optional negative prompt.
    pub negative_prompt: Option<String>,
    /// Whether to run face restoration.
    pub fix_faces: bool,
    /// Face restoration strength in `[0, 1]`.
    pub restoration_strength: Option<f32>,
    /// Face upscale factor.
    pub face_upscale: Option<u8>,
    /// LoRAs to apply.
    #[serde(default)]
    pub loras: Vec<LoraRef>,
    /// Iteration this request belongs to, for provider-side logging.
    pub iteration: Option<u32>,
    /// Candidate id this request belongs to, for provider-side logging.
    pub candidate_id: Option<String>,
    /// Session id this request belongs to, for provider-side logging.
    pub session_id: Option<String>,
}

/// Result of an image generation call. Exactly one of `url`/`local_path` is
/// populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Remote URL of the generated image.
    pub url: Option<String>,
    /// Local filesystem path of the generated image.
    pub local_path: Option<String>,
    /// Provider-revised prompt, if the provider rewrote it.
    pub revised_prompt: Option<String>,
    /// Opaque provider metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Usage recorded for this call.
    pub usage: Usage,
}

impl GenerateResponse {
    /// Validate the "exactly one of url/local_path" invariant.
    pub fn is_well_formed(&self) -> bool {
        self.url.is_some() != self.local_path.is_some()
    }
}

/// Request to visually evaluate one candidate image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    /// The image to evaluate, as a URL or local path string.
    pub image: String,
    /// The user's original prompt, for alignment scoring.
    pub prompt: String,
    /// Optional focus areas to weight during scoring.
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

/// Result of a vision analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    /// The resulting evaluation.
    pub evaluation: Evaluation,
    /// Caption describing the image.
    pub caption: String,
    /// Noted strengths.
    pub strengths: Vec<String>,
    /// Noted weaknesses.
    pub weaknesses: Vec<String>,
    /// Usage recorded for this call.
    pub usage: Usage,
}

impl AnalyzeResponse {
    /// Validate the evaluation's ranges before returning to the
    /// orchestrator, per the provider contract.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.evaluation.alignment) {
            return Err(format!(
                "alignment {} out of range [0, 100]",
                self.evaluation.alignment
            ));
        }
        if !(0.0..=10.0).contains(&self.evaluation.aesthetic) {
            return Err(format!(
                "aesthetic {} out of range [0, 10]",
                self.evaluation.aesthetic
            ));
        }
        Ok(())
    }
}

/// Which side of a pairwise VLM comparison won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Choice {
    /// The first image.
    A,
    /// The second image.
    B,
}

/// Per-side ranks reported by a VLM comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SideRanks {
    /// Alignment score for this side.
    pub alignment: f32,
    /// Aesthetic score for this side.
    pub aesthetics: f32,
}

/// Result of one pairwise VLM comparison call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareResponse {
    /// Which side won.
    pub choice: Choice,
    /// Per-side ranks.
    pub ranks_a: SideRanks,
    /// Per-side ranks, second side.
    pub ranks_b: SideRanks,
    /// Strengths attributed to the winner.
    pub winner_strengths: Vec<String>,
    /// Weaknesses attributed to the loser.
    pub loser_weaknesses: Vec<String>,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
}

/// One candidate submitted for tournament ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankCandidate {
    /// The candidate id.
    pub id: String,
    /// The image to compare.
    pub image: String,
}

/// Per-candidate ranking outcome from a `rank` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRanking {
    /// The candidate id.
    pub id: String,
    /// Tournament wins.
    pub wins: u32,
    /// Total pairs involving this candidate.
    pub total_pairs: u32,
    /// Aggregated strengths/weaknesses text.
    pub strengths: Vec<String>,
    /// Aggregated weaknesses text.
    pub weaknesses: Vec<String>,
}

/// Result of a full tournament `rank` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankResponse {
    /// Per-candidate rankings.
    pub rankings: Vec<CandidateRanking>,
    /// Non-fatal errors encountered (e.g. failed pairs).
    pub errors: Vec<String>,
}
