//! Generic publish/subscribe bus, keyed by event type.
//!
//! Generalized from a broadcast-channel bus hardcoded to one payload type
//! into a generic `(eventType, source, payload)` carrier, matching the
//! `emit(type, payload)` / `on(type, cb) -> unsubscribe` contract: emission
//! invokes every matching subscriber before returning, and one subscriber's
//! failure is logged but never stops the remaining fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;

/// Envelope handed to each subscriber callback.
#[derive(Debug, Clone)]
pub struct EventEnvelope<P> {
    pub event_type: String,
    pub source: Option<String>,
    pub payload: P,
}

type Callback<P> = Arc<dyn Fn(EventEnvelope<P>) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Subscribe/publish bus for event-type triggers.
pub struct EventBus<P> {
    subscribers: DashMap<String, Vec<(u64, Callback<P>)>>,
    next_id: AtomicU64,
}

impl<P> EventBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Register a subscriber for `event_type`. The returned handle detaches
    /// the subscriber when `unsubscribe` is called; dropping it without
    /// calling `unsubscribe` leaves the subscription active.
    pub fn on<F, Fut>(self: &Arc<Self>, event_type: impl Into<String>, callback: F) -> UnsubscribeHandle<P>
    where
        F: Fn(EventEnvelope<P>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        let event_type = event_type.into();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let boxed: Callback<P> = Arc::new(move |envelope| Box::pin(callback(envelope)));

        self.subscribers
            .entry(event_type.clone())
            .or_default()
            .push((id, boxed));

        UnsubscribeHandle {
            bus: Arc::clone(self),
            event_type,
            id,
        }
    }

    /// Publish to every subscriber of `event_type`. Subscribers are awaited
    /// in registration order; a failing subscriber is logged and does not
    /// prevent the remaining subscribers from running.
    pub async fn emit(&self, event_type: &str, source: Option<String>, payload: P) {
        let callbacks = self
            .subscribers
            .get(event_type)
            .map(|entry| entry.value().clone());

        let Some(callbacks) = callbacks else {
            return;
        };

        for (_, callback) in callbacks {
            let envelope = EventEnvelope {
                event_type: event_type.to_string(),
                source: source.clone(),
                payload: payload.clone(),
            };
            if let Err(error) = callback(envelope).await {
                tracing::warn!(event_type, %error, "event subscriber failed");
            }
        }
    }

    fn unsubscribe(&self, event_type: &str, id: u64) {
        if let Some(mut entry) = self.subscribers.get_mut(event_type) {
            entry.retain(|(existing_id, _)| *existing_id != id);
        }
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers
            .get(event_type)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

/// Handle returned from `EventBus::on`. Call `unsubscribe` to detach.
pub struct UnsubscribeHandle<P> {
    bus: Arc<EventBus<P>>,
    event_type: String,
    id: u64,
}

impl<P> UnsubscribeHandle<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn unsubscribe(self) {
        self.bus.unsubscribe(&self.event_type, self.id);
    }
}
