use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use beam_core::{Event, JobId};

use crate::bus::EventBus;

/// Error returned by a [`Transport`] when it can no longer deliver events
/// (closed socket, broken pipe, client gone).
#[derive(Debug, Error)]
#[error("transport send failed: {0}")]
pub struct TransportError(pub String);

/// A write-capable sink for one subscriber. A real binary would implement
/// this over a WebSocket connection; nothing here depends on a concrete
/// HTTP or socket framework.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, event: &Event) -> Result<(), TransportError>;
}

type SubscriberKey = (JobId, u64);

/// Forwards bus events to every attached transport for a job. Delivery is
/// best-effort per subscriber: a slow or broken transport is dropped on
/// its own schedule and never back-pressures the others, since each
/// subscriber is driven by its own forwarding task.
pub struct WSFanout<T: Transport + 'static> {
    bus: Arc<EventBus>,
    handles: Mutex<HashMap<SubscriberKey, tokio::task::JoinHandle<()>>>,
    next_id: AtomicU64,
    _transport: std::marker::PhantomData<T>,
}

impl<T: Transport + 'static> WSFanout<T> {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            handles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            _transport: std::marker::PhantomData,
        }
    }

    /// Attach `transport` as a new subscriber on `job_id`. Returns a handle
    /// that can be passed to [`WSFanout::detach`]. If `job_id` is unknown to
    /// the bus this still succeeds (the bus has no concept of "unknown job";
    /// that check belongs to the job registry per spec §4.9) but no events
    /// will ever arrive unless something later publishes to that id.
    pub fn attach(self: &Arc<Self>, job_id: JobId, transport: T) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let bus = self.bus.clone();
        let this = self.clone();

        let handle = tokio::spawn(async move {
            let mut sub = bus.subscribe(job_id);
            while let Some(event) = sub.next().await {
                if let Err(err) = transport.send(&event).await {
                    debug!(job_id = %job_id, subscriber = id, %err, "transport send failed, detaching subscriber");
                    break;
                }
            }
            this.forget((job_id, id));
        });

        self.handles
            .lock()
            .expect("fanout registry poisoned")
            .insert((job_id, id), handle);
        id
    }

    /// Explicitly detach a subscriber, aborting its forwarding task.
    pub fn detach(&self, job_id: JobId, subscriber_id: u64) {
        if let Some(handle) = self
            .handles
            .lock()
            .expect("fanout registry poisoned")
            .remove(&(job_id, subscriber_id))
        {
            handle.abort();
        }
    }

    /// Number of subscribers currently attached across all jobs.
    pub fn subscriber_count(&self) -> usize {
        self.handles.lock().expect("fanout registry poisoned").len()
    }

    fn forget(&self, key: SubscriberKey) {
        self.handles.lock().expect("fanout registry poisoned").remove(&key);
    }
}
