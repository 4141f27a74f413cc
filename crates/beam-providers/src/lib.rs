#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Narrow capability interfaces for the four upstreams the orchestrator
//! consumes (Text, ImageGen, Vision, VLM), plus deterministic stub
//! implementations for tests and demos.
//!
//! Optional capabilities (batch image generation) are exposed through a
//! feature-probe method rather than duck typing.

pub mod stub;
pub mod traits;
pub mod types;

pub use traits::{
    BatchImageGenProvider, ImageGenProvider, ProviderError, RankProgressHook, TextProvider,
    VLMProvider, VisionProvider,
};
pub use types::{
    AnalyzeRequest, AnalyzeResponse, CandidateRanking, Choice, CombineRequest, CombineResponse,
    CompareResponse, Descriptiveness, Dimension, GenerateRequest, GenerateResponse, LoraRef,
    RankCandidate, RankResponse, RefineRequest, RefineResponse, SideRanks, NONE_SENTINEL,
};
