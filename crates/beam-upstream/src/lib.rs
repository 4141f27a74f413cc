#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Coordination around the upstream services the orchestrator calls:
//! concurrency limits ([`rate_gate`]), retry/restart plumbing
//! ([`service_connection`]), GPU mutual exclusion ([`gpu_coordinator`]),
//! and per-job cost accounting ([`token_tracker`]).

pub mod gpu_coordinator;
pub mod pricing;
pub mod rate_gate;
pub mod service_connection;
pub mod token_tracker;

pub use gpu_coordinator::{GpuCoordinator, GpuState, UnloadHook};
pub use pricing::{ModelPricing, PricingTable};
pub use rate_gate::{OnLimitChanged, RateGate, RateGateError, RateGateRegistry};
pub use service_connection::{BackoffPolicy, RestartHook, ServiceConnection, ServiceConnectionError};
pub use token_tracker::{FlaggedCall, OptimizationReport, TokenTracker};
