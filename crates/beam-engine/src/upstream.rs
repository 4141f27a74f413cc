use std::collections::HashMap;
use std::sync::Arc;

use beam_core::Capability;
use beam_upstream::{BackoffPolicy, GpuCoordinator, PricingTable, RateGateRegistry, ServiceConnection};

/// Bundles the upstream-coordination primitives an orchestrator run
/// shares across every capability: concurrency gates, the GPU mutual
/// exclusion lock, one retry wrapper per capability, and the pricing
/// table used to build each job's `TokenTracker`.
pub struct UpstreamContext {
    pub rate_gates: Arc<RateGateRegistry>,
    pub gpu: Arc<GpuCoordinator>,
    pub connections: HashMap<Capability, Arc<ServiceConnection>>,
    pub pricing: PricingTable,
}

impl UpstreamContext {
    /// Construct a context with the default backoff policy for every
    /// capability and no restart hooks; callers that need a restart hook
    /// for a given capability can replace its entry in `connections`
    /// before wiring the context into an orchestrator.
    pub fn new(gpu: Arc<GpuCoordinator>, pricing: PricingTable) -> Self {
        let mut connections = HashMap::new();
        for capability in Capability::ALL {
            connections.insert(
                capability,
                Arc::new(ServiceConnection::new(
                    capability.to_string(),
                    BackoffPolicy::default(),
                    None,
                )),
            );
        }
        Self {
            rate_gates: Arc::new(RateGateRegistry::new()),
            gpu,
            connections,
            pricing,
        }
    }

    pub fn connection(&self, capability: Capability) -> Arc<ServiceConnection> {
        self.connections
            .get(&capability)
            .cloned()
            .unwrap_or_else(|| {
                Arc::new(ServiceConnection::new(
                    capability.to_string(),
                    BackoffPolicy::default(),
                    None,
                ))
            })
    }
}
