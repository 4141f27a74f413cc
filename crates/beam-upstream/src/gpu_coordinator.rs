use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use beam_core::Capability;

/// Whether a capability's model weights currently occupy GPU memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuState {
    Loaded,
    Unloaded,
}

/// Hook that unloads a capability's model from the GPU. Injected so the
/// coordinator never depends on a concrete provider.
pub type UnloadHook = Box<dyn Fn(Capability) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync>;

struct Inner {
    loaded: Option<Capability>,
    states: HashMap<Capability, GpuState>,
}

/// Process-wide mutual exclusion over the single shared GPU: at most one
/// of {text, image-gen, vision, vlm} is GPU-resident at a time. The whole
/// body of a `with_operation` call runs inside the one coordinator-wide
/// lock, not just the load/unload swap, matching the single small GPU
/// this coordinates being a genuinely serial resource.
pub struct GpuCoordinator {
    lock: Mutex<Inner>,
    unload: Option<UnloadHook>,
}

impl GpuCoordinator {
    pub fn new(unload: Option<UnloadHook>) -> Self {
        Self {
            lock: Mutex::new(Inner {
                loaded: None,
                states: HashMap::new(),
            }),
            unload,
        }
    }

    /// Run `op` with `capability` guaranteed to be the sole GPU-resident
    /// service for the duration. If a different capability is currently
    /// loaded, it is unloaded first via the injected hook. Releases on
    /// both normal and error exit since the guard simply drops.
    pub async fn with_operation<F, Fut, T>(&self, capability: Capability, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let mut inner = self.lock.lock().await;

        if inner.loaded != Some(capability) {
            if let Some(previous) = inner.loaded {
                debug!(from = %previous, to = %capability, "swapping GPU-resident capability");
                if let Some(hook) = &self.unload {
                    hook(previous).await;
                }
                inner.states.insert(previous, GpuState::Unloaded);
            }
            inner.loaded = Some(capability);
            inner.states.insert(capability, GpuState::Loaded);
        }

        op().await
    }

    /// Unload every known capability, swallowing per-service failures into
    /// logs (best-effort, never surfaced to the caller).
    pub async fn cleanup_all(&self) {
        let mut inner = self.lock.lock().await;
        if let Some(loaded) = inner.loaded.take() {
            if let Some(hook) = &self.unload {
                hook(loaded).await;
            }
        }
        for state in inner.states.values_mut() {
            *state = GpuState::Unloaded;
        }
    }

    /// Snapshot of load status per capability seen so far.
    pub async fn states(&self) -> HashMap<Capability, GpuState> {
        self.lock.lock().await.states.clone()
    }
}
