use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use beam_core::RankingMode;

/// Ranking strategy, mirrored from [`beam_core::RankingMode`] so clap can
/// derive a `ValueEnum` for it without beam-core depending on clap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RankingModeArg {
    Score,
    Vlm,
}

impl From<RankingModeArg> for RankingMode {
    fn from(value: RankingModeArg) -> Self {
        match value {
            RankingModeArg::Score => RankingMode::Score,
            RankingModeArg::Vlm => RankingMode::Vlm,
        }
    }
}

/// Submits one beam-search job and streams its events to stdout until it
/// reaches a terminal state.
#[derive(Debug, Clone, Parser)]
#[command(name = "beam", version, about = "Beam-search image generation orchestrator")]
pub struct Cli {
    /// The prompt to optimize.
    #[arg(long, env = "BEAM_PROMPT")]
    pub prompt: String,

    /// Beam width: candidates per iteration.
    #[arg(long, env = "BEAM_N", default_value_t = 4)]
    pub n: u32,

    /// Survivors retained per generation.
    #[arg(long, env = "BEAM_M", default_value_t = 2)]
    pub m: u32,

    /// Maximum number of iterations to run.
    #[arg(long = "max-iterations", env = "BEAM_MAX_ITERATIONS", default_value_t = 2)]
    pub max_iterations: u32,

    /// Alignment/aesthetic blending weight, in `[0, 1]`.
    #[arg(long, env = "BEAM_ALPHA", default_value_t = 0.7)]
    pub alpha: f32,

    /// Sampling temperature passed to the text provider, in `[0, 2]`.
    #[arg(long, env = "BEAM_TEMPERATURE", default_value_t = 0.8)]
    pub temperature: f32,

    /// Combine-prompt descriptiveness level, 1-3.
    #[arg(long, env = "BEAM_DESCRIPTIVENESS", default_value_t = 2)]
    pub descriptiveness: u8,

    /// VLM ensemble size for tournament voting (odd, >= 1).
    #[arg(long = "ensemble-size", env = "BEAM_ENSEMBLE_SIZE", default_value_t = 3)]
    pub ensemble_size: u32,

    /// Ranking strategy.
    #[arg(long = "ranking-mode", env = "BEAM_RANKING_MODE", value_enum, default_value_t = RankingModeArg::Score)]
    pub ranking_mode: RankingModeArg,

    /// Directory persisted metadata files are written under.
    #[arg(long = "output-dir", env = "BEAM_OUTPUT_DIR", default_value = "./beam-output")]
    pub output_dir: PathBuf,

    /// Path to a JSON pricing table
    /// (`{"model-id": {"rate_per_unit": ..., "per_image": ...}}`). Unset
    /// means every call is costed at zero.
    #[arg(long = "pricing-table", env = "BEAM_PRICING_TABLE")]
    pub pricing_table: Option<PathBuf>,

    /// Per-capability provider-family override, `capability=family`
    /// (e.g. `image-gen=local`). May be repeated or comma-separated.
    #[arg(long = "provider-family", env = "BEAM_PROVIDER_FAMILY", value_delimiter = ',')]
    pub provider_family: Vec<String>,

    /// Per-(capability,family) concurrency override,
    /// `capability:family=limit` (e.g. `text:remote=8`). May be repeated or
    /// comma-separated.
    #[arg(long = "rate-limit", env = "BEAM_RATE_LIMIT", value_delimiter = ',')]
    pub rate_limit: Vec<String>,

    /// Request face restoration on generated images.
    #[arg(long = "fix-faces", env = "BEAM_FIX_FACES", default_value_t = false)]
    pub fix_faces: bool,

    /// Face restoration strength, in `[0, 1]`. Only meaningful with
    /// `--fix-faces`.
    #[arg(long = "restoration-strength", env = "BEAM_RESTORATION_STRENGTH")]
    pub restoration_strength: Option<f32>,

    /// Face upscale factor, 1 or 2. Only meaningful with `--fix-faces`.
    #[arg(long = "face-upscale", env = "BEAM_FACE_UPSCALE")]
    pub face_upscale: Option<u8>,
}
