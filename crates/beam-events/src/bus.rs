use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use beam_core::{Event, EventKind, JobId};

/// Default capacity of the per-job broadcast channel and of each
/// subscriber's forwarding buffer.
const DEFAULT_CAPACITY: usize = 256;

/// In-process pub/sub bus keyed by job id. One `broadcast` channel backs
/// each job; `publish` never blocks on subscriber readiness and each
/// subscription has its own bounded forwarding buffer so a slow consumer
/// only loses its own events, never another subscriber's.
pub struct EventBus {
    channels: DashMap<JobId, broadcast::Sender<Event>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender_for(&self, job_id: JobId) -> broadcast::Sender<Event> {
        self.channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Enqueue `event` for every active subscription on its job id.
    /// A job with no subscribers simply drops the event.
    pub fn publish(&self, event: Event) {
        let sender = self.sender_for(event.job_id);
        // send() only errors when there are no receivers, which is a
        // normal and expected state (e.g. nobody is watching this job).
        let _ = sender.send(event);
    }

    /// Subscribe to a job's event stream. Events are delivered in publish
    /// order; on overflow the subscription drops the oldest pending event
    /// and synthesizes one `EventKind::Lag` marker rather than silently
    /// losing history.
    pub fn subscribe(&self, job_id: JobId) -> Subscription {
        let mut broadcast_rx = self.sender_for(job_id).subscribe();
        let (tx, rx) = mpsc::channel(self.capacity);

        let task = tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(job_id = %job_id, skipped, "subscriber lagged, synthesizing lag marker");
                        let lag = Event::new(job_id, EventKind::Lag { skipped });
                        if tx.send(lag).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription {
            job_id,
            rx,
            task: Some(task),
        }
    }

    /// Drop the stored sender for a job once it is finished. Subscribers
    /// already forwarding events keep draining what was already queued;
    /// once that drains, their streams close.
    pub fn close_job(&self, job_id: JobId) {
        self.channels.remove(&job_id);
    }

    /// Number of jobs currently tracked (have been published to or
    /// subscribed to at least once and not yet closed).
    pub fn active_job_count(&self) -> usize {
        self.channels.len()
    }
}

/// A single-consumer handle to one job's event stream.
pub struct Subscription {
    job_id: JobId,
    rx: mpsc::Receiver<Event>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Await the next event, or `None` once the bus closes this job and
    /// all queued events have drained.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Stop forwarding immediately, abandoning any queued events.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_core::EventKind;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_events_in_publish_order() {
        let bus = EventBus::default();
        let job = JobId::new();
        let mut sub = bus.subscribe(job);

        bus.publish(Event::new(job, EventKind::Subscribed));
        bus.publish(Event::new(job, EventKind::Cancelled));

        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        assert!(matches!(first.kind, EventKind::Subscribed));
        assert!(matches!(second.kind, EventKind::Cancelled));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        let job = JobId::new();
        bus.publish(Event::new(job, EventKind::Cancelled));
    }

    #[tokio::test]
    async fn each_subscription_gets_its_own_copy() {
        let bus = EventBus::default();
        let job = JobId::new();
        let mut sub_a = bus.subscribe(job);
        let mut sub_b = bus.subscribe(job);

        bus.publish(Event::new(job, EventKind::Subscribed));

        assert!(sub_a.next().await.is_some());
        assert!(sub_b.next().await.is_some());
    }

    #[tokio::test]
    async fn overflow_synthesizes_lag_marker() {
        let bus = EventBus::new(2);
        let job = JobId::new();
        let mut sub = bus.subscribe(job);

        for _ in 0..10 {
            bus.publish(Event::new(job, EventKind::Subscribed));
        }
        // Give the forwarder task a chance to observe the broadcast lag.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut saw_lag = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), sub.next()).await
        {
            if matches!(event.kind, EventKind::Lag { .. }) {
                saw_lag = true;
            }
        }
        assert!(saw_lag);
    }

    #[tokio::test]
    async fn close_job_eventually_ends_the_stream() {
        let bus = EventBus::default();
        let job = JobId::new();
        let mut sub = bus.subscribe(job);
        bus.close_job(job);
        assert!(sub.next().await.is_none());
    }
}
