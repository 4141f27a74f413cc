use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::capability::ProviderFamily;
use crate::error::CoreError;
use crate::ids::JobId;

/// Ranking strategy for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingMode {
    /// Rank by total score alone.
    Score,
    /// Rank via all-pairs VLM tournament.
    Vlm,
}

/// Optional face-fixing parameters passed through to the image provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceFixOptions {
    /// Whether face restoration is requested.
    pub fix_faces: bool,
    /// Restoration strength in `[0, 1]`.
    pub restoration_strength: Option<f32>,
    /// Face upscale factor, either 1 or 2.
    pub face_upscale: Option<u8>,
}

/// A fully validated job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobParams {
    /// The user's text prompt.
    pub prompt: String,
    /// Beam width: candidates per iteration.
    pub n: u32,
    /// Survivors retained per generation.
    pub m: u32,
    /// Maximum number of iterations to run.
    pub max_iterations: u32,
    /// Alignment/aesthetic blending weight, in `[0, 1]`.
    pub alpha: f32,
    /// Sampling temperature passed to the text provider, in `[0, 2]`.
    pub temperature: f32,
    /// Combine-prompt descriptiveness level, 1-3.
    pub descriptiveness: u8,
    /// VLM ensemble size for tournament voting (odd, >= 1).
    pub ensemble_size: u32,
    /// Ranking strategy.
    pub ranking_mode: RankingMode,
    /// Optional per-capability model id overrides.
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Optional per-capability provider-family overrides.
    #[serde(default)]
    pub provider_families: HashMap<String, ProviderFamily>,
    /// Optional face-fixing block.
    #[serde(default)]
    pub face_fix: Option<FaceFixOptions>,
    /// Opaque, provider-specific option bags (flux/modal/bfl, ...), passed
    /// through verbatim. The core never interprets these.
    #[serde(default)]
    pub provider_options: serde_json::Value,
}

impl JobParams {
    /// Validate this submission against the rules in the external interface
    /// spec. Returns the offending field name on failure.
    pub fn validate(&self) -> Result<(), CoreError> {
        let fail = |field: &str, reason: &str| -> CoreError {
            CoreError::Validation {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        };

        if self.prompt.trim().is_empty() {
            return Err(fail("prompt", "must not be empty"));
        }
        if self.n < 2 || self.n % 2 != 0 {
            return Err(fail("n", "must be even and >= 2"));
        }
        if self.m == 0 || self.n % self.m != 0 {
            return Err(fail("m", "must divide n"));
        }
        if self.m > self.n / 2 {
            return Err(fail("m", "must be <= n/2"));
        }
        if self.max_iterations < 1 {
            return Err(fail("maxIterations", "must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(fail("alpha", "must be in [0, 1]"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(fail("temperature", "must be in [0, 2]"));
        }
        if !(1..=3).contains(&self.descriptiveness) {
            return Err(fail("descriptiveness", "must be 1, 2, or 3"));
        }
        if self.ensemble_size == 0 || self.ensemble_size % 2 == 0 {
            return Err(fail("ensembleSize", "must be odd and >= 1"));
        }
        if let Some(fix) = &self.face_fix {
            if let Some(strength) = fix.restoration_strength {
                if !(0.0..=1.0).contains(&strength) {
                    return Err(fail(
                        "faceFix.restorationStrength",
                        "must be in [0, 1]",
                    ));
                }
            }
            if let Some(upscale) = fix.face_upscale {
                if upscale != 1 && upscale != 2 {
                    return Err(fail("faceFix.faceUpscale", "must be 1 or 2"));
                }
            }
        }
        Ok(())
    }

    /// Number of children each survivor expands into.
    pub fn expansion_ratio(&self) -> u32 {
        self.n / self.m
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted but not yet picked up by the orchestrator.
    Pending,
    /// The orchestrator is actively running this job.
    Running,
    /// Cooperatively cancelled.
    Cancelled,
    /// Terminated by an unrecoverable error.
    Failed,
    /// Ran to completion.
    Complete,
}

/// A job record, owned by the job registry for the job's whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id.
    pub id: JobId,
    /// Validated submission parameters.
    pub params: JobParams,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Wall-clock time the job was created.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Job {
    /// Create a new job record in `Pending` status.
    pub fn new(params: JobParams) -> Self {
        Self {
            id: JobId::new(),
            params,
            status: JobStatus::Pending,
            created_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> JobParams {
        JobParams {
            prompt: "mountains".to_string(),
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
    fn accepts_happy_path_params() {
        assert!(base_params().validate().is_ok());
    }

    #[test]
    fn rejects_n_not_divisible_by_m() {
        let mut p = base_params();
        p.n = 5;
        p.m = 2;
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_m_greater_than_half_n() {
        let mut p = base_params();
        p.n = 4;
        p.m = 3;
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_even_ensemble_size() {
        let mut p = base_params();
        p.ensemble_size = 4;
        assert!(p.validate().is_err());
    }

    #[test]
    fn boundary_n2_m1_is_valid() {
        let mut p = base_params();
        p.n = 2;
        p.m = 1;
        p.max_iterations = 1;
        assert!(p.validate().is_ok());
        assert_eq!(p.expansion_ratio(), 2);
    }
}
