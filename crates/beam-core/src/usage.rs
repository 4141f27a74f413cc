use serde::{Deserialize, Serialize};

/// Which cost bucket a usage record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CostBucket {
    /// Text refinement/combination calls.
    Text,
    /// Vision and VLM calls.
    Vision,
    /// Image generation calls.
    ImageGen,
}

/// A single recorded unit of upstream usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Name of the provider that produced this usage record.
    pub provider: String,
    /// Operation name, e.g. `"refine"`, `"generate"`, `"analyze"`, `"compare"`.
    pub operation: String,
    /// Token count consumed (0 for non-token-metered operations such as
    /// image generation, where cost is derived from the pricing table).
    pub tokens: u64,
    /// Model id, used to look up pricing.
    pub model: String,
    /// Which refinement dimension this call was for, if applicable.
    pub dimension: Option<String>,
    /// Which cost bucket this usage accrues to.
    pub bucket: CostBucket,
}

/// Running cost totals split by bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTotals {
    /// Accumulated text cost, in the pricing table's currency unit.
    pub text: f64,
    /// Accumulated vision/VLM cost.
    pub vision: f64,
    /// Accumulated image-generation cost.
    pub image_gen: f64,
}

impl CostTotals {
    /// Sum of all three buckets.
    pub fn total(&self) -> f64 {
        self.text + self.vision + self.image_gen
    }

    /// Add `amount` to the bucket named by `bucket`.
    pub fn add(&mut self, bucket: CostBucket, amount: f64) {
        match bucket {
            CostBucket::Text => self.text += amount,
            CostBucket::Vision => self.vision += amount,
            CostBucket::ImageGen => self.image_gen += amount,
        }
    }
}
