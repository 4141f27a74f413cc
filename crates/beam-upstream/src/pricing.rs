use std::collections::HashMap;

/// Per-model cost rate. `rate_per_unit` is expressed per 1000 tokens
/// (text/vision models); `per_image` is a flat per-call constant for
/// image-gen models whose provider doesn't report its own usage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModelPricing {
    pub rate_per_unit: f64,
    pub per_image: f64,
}

/// Injected model -> price lookup. Deliberately not a singleton: the spec
/// flags ambient global pricing state as something to design away, so
/// every [`crate::token_tracker::TokenTracker`] is handed its own table.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    rates: HashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn new(rates: HashMap<String, ModelPricing>) -> Self {
        Self { rates }
    }

    /// Estimated cost for `tokens` units of `model`; unknown models cost
    /// nothing rather than panicking, since a test or stub model will
    /// rarely have a pricing entry.
    pub fn estimate(&self, model: &str, units: u64) -> f64 {
        self.rates
            .get(model)
            .map(|p| p.rate_per_unit * units as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    /// Estimated cost of one image-gen call against `model`, for providers
    /// that don't report their own usage. Unknown models cost nothing, same
    /// convention as [`Self::estimate`].
    pub fn estimate_image(&self, model: &str) -> f64 {
        self.rates.get(model).map(|p| p.per_image).unwrap_or(0.0)
    }
}
