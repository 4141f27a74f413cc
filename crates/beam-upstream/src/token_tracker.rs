use std::collections::HashMap;
use std::sync::Mutex;

use beam_core::{CostBucket, CostTotals, Usage};

use crate::pricing::PricingTable;

/// Default per-call token count above which [`TokenTracker::optimization_report`]
/// flags a call as worth a closer look.
pub const DEFAULT_TOKEN_THRESHOLD: u64 = 4_000;

/// A single flagged call in an [`OptimizationReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedCall {
    pub operation: String,
    pub model: String,
    pub tokens: u64,
}

/// Output of [`TokenTracker::optimization_report`]: simple, explainable
/// heuristics rather than a model-driven recommendation engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationReport {
    pub flagged_calls: Vec<FlaggedCall>,
    pub recommendations: Vec<String>,
}

/// Running per-job token/cost ledger. All state is per-job: no cross-job
/// aggregation lives in the core, matching the spec's explicit rejection
/// of a global usage singleton.
pub struct TokenTracker {
    entries: Mutex<Vec<Usage>>,
    pricing: PricingTable,
    token_threshold: u64,
}

impl TokenTracker {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            pricing,
            token_threshold: DEFAULT_TOKEN_THRESHOLD,
        }
    }

    pub fn with_threshold(pricing: PricingTable, token_threshold: u64) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            pricing,
            token_threshold,
        }
    }

    /// Record one call's usage tuple.
    pub fn record(&self, usage: Usage) {
        self.entries.lock().expect("token tracker poisoned").push(usage);
    }

    /// Running estimated cost split by bucket.
    pub fn totals(&self) -> CostTotals {
        let entries = self.entries.lock().expect("token tracker poisoned");
        let mut totals = CostTotals::default();
        for usage in entries.iter() {
            let cost = self.cost_of(usage);
            totals.add(usage.bucket, cost);
        }
        totals
    }

    /// Image-gen calls are priced per-image rather than per-token, since
    /// `Usage::tokens` is always 0 for them.
    fn cost_of(&self, usage: &Usage) -> f64 {
        if usage.bucket == CostBucket::ImageGen {
            self.pricing.estimate_image(&usage.model)
        } else {
            self.pricing.estimate(&usage.model, usage.tokens)
        }
    }

    /// Human-readable one-line-per-bucket summary.
    pub fn summary(&self) -> String {
        let totals = self.totals();
        format!(
            "text=${:.4} vision=${:.4} imageGen=${:.4} total=${:.4}",
            totals.text,
            totals.vision,
            totals.image_gen,
            totals.total()
        )
    }

    /// Flag individually expensive calls and recommend a cheaper tier when
    /// spend concentrates heavily on one operation.
    pub fn optimization_report(&self) -> OptimizationReport {
        let entries = self.entries.lock().expect("token tracker poisoned");

        let flagged_calls = entries
            .iter()
            .filter(|u| u.tokens > self.token_threshold)
            .map(|u| FlaggedCall {
                operation: u.operation.clone(),
                model: u.model.clone(),
                tokens: u.tokens,
            })
            .collect();

        let mut spend_by_operation: HashMap<String, f64> = HashMap::new();
        let mut total_spend = 0.0;
        for usage in entries.iter() {
            let cost = self.cost_of(usage);
            *spend_by_operation.entry(usage.operation.clone()).or_insert(0.0) += cost;
            total_spend += cost;
        }

        let mut recommendations = Vec::new();
        if total_spend > 0.0 {
            for (operation, spend) in &spend_by_operation {
                if spend / total_spend > 0.9 {
                    recommendations.push(format!(
                        "{:.0}% of spend is under '{operation}'; consider a cheaper model tier for it",
                        spend / total_spend * 100.0
                    ));
                }
            }
        }
        recommendations.sort();

        OptimizationReport {
            flagged_calls,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::ModelPricing;

    fn tracker_with_rate(model: &str, rate: f64) -> TokenTracker {
        let mut rates = HashMap::new();
        rates.insert(
            model.to_string(),
            ModelPricing {
                rate_per_unit: rate,
                per_image: 0.0,
            },
        );
        TokenTracker::new(PricingTable::new(rates))
    }

    #[test]
    fn totals_sum_by_bucket() {
        let tracker = tracker_with_rate("gpt-text", 10.0);
        tracker.record(Usage {
            provider: "openai".into(),
            operation: "refine".into(),
            tokens: 1000,
            model: "gpt-text".into(),
            dimension: None,
            bucket: CostBucket::Text,
        });
        let totals = tracker.totals();
        assert!((totals.text - 10.0).abs() < 1e-9);
        assert_eq!(totals.vision, 0.0);
    }

    #[test]
    fn image_gen_usage_priced_per_image_not_per_token() {
        let mut rates = HashMap::new();
        rates.insert(
            "dalle".to_string(),
            ModelPricing {
                rate_per_unit: 10.0,
                per_image: 0.04,
            },
        );
        let tracker = TokenTracker::new(PricingTable::new(rates));
        tracker.record(Usage {
            provider: "openai".into(),
            operation: "generate".into(),
            tokens: 0,
            model: "dalle".into(),
            dimension: None,
            bucket: CostBucket::ImageGen,
        });
        let totals = tracker.totals();
        assert!((totals.image_gen - 0.04).abs() < 1e-9);
    }

    #[test]
    fn flags_calls_above_threshold() {
        let tracker = TokenTracker::with_threshold(PricingTable::default(), 100);
        tracker.record(Usage {
            provider: "p".into(),
            operation: "expand".into(),
            tokens: 500,
            model: "m".into(),
            dimension: None,
            bucket: CostBucket::Text,
        });
        let report = tracker.optimization_report();
        assert_eq!(report.flagged_calls.len(), 1);
        assert_eq!(report.flagged_calls[0].tokens, 500);
    }

    #[test]
    fn recommends_cheaper_tier_when_spend_concentrated() {
        let tracker = tracker_with_rate("gpt-text", 10.0);
        tracker.record(Usage {
            provider: "openai".into(),
            operation: "expand".into(),
            tokens: 5000,
            model: "gpt-text".into(),
            dimension: None,
            bucket: CostBucket::Text,
        });
        tracker.record(Usage {
            provider: "openai".into(),
            operation: "combine".into(),
            tokens: 10,
            model: "gpt-text".into(),
            dimension: None,
            bucket: CostBucket::Text,
        });
        let report = tracker.optimization_report();
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].contains("expand"));
    }

    #[test]
    fn no_recommendation_when_spend_is_balanced() {
        let tracker = tracker_with_rate("gpt-text", 10.0);
        tracker.record(Usage {
            provider: "openai".into(),
            operation: "expand".into(),
            tokens: 100,
            model: "gpt-text".into(),
            dimension: None,
            bucket: CostBucket::Text,
        });
        tracker.record(Usage {
            provider: "openai".into(),
            operation: "combine".into(),
            tokens: 100,
            model: "gpt-text".into(),
            dimension: None,
            bucket: CostBucket::Text,
        });
        let report = tracker.optimization_report();
        assert!(report.recommendations.is_empty());
    }
}
