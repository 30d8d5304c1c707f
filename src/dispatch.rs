//! Topic-based dispatcher mapping inbound envelopes to subscribers.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::core::Envelope;

/// Handler invoked for every envelope on a subscribed topic.
pub type TopicHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

struct HandlerEntry {
    id: u64,
    handler: TopicHandler,
}

#[derive(Default)]
struct RouterInner {
    topics: Mutex<HashMap<String, Vec<HandlerEntry>>>,
    next_id: AtomicU64,
}

/// Registry mapping topic strings to subscriber handlers.
///
/// Cloning the router clones a handle to one shared registry. Registration
/// identity is the handler `Arc`: subscribing the same `Arc` twice under one
/// topic keeps a single registration, so a repeated subscribe never causes
/// duplicate delivery. The router is independent of connection state; it only
/// ever sees decoded envelopes.
#[derive(Clone, Default)]
pub struct TopicRouter {
    inner: Arc<RouterInner>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Vec<HandlerEntry>>> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` under `topic`.
    ///
    /// The returned guard removes exactly this `(topic, handler)` pair and may
    /// be called more than once. Dropping the guard without calling it leaves
    /// the handler registered; handler lifetime is bounded only by explicit
    /// unsubscribe or [`clear`](TopicRouter::clear).
    pub fn subscribe(&self, topic: impl Into<String>, handler: TopicHandler) -> Subscription {
        let topic = topic.into();
        let mut topics = self.registry();
        let entries = topics.entry(topic.clone()).or_default();

        if let Some(existing) = entries
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.handler, &handler))
        {
            // Same handler already registered for this topic: set semantics.
            return Subscription::new(self.clone(), topic, existing.id);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        entries.push(HandlerEntry { id, handler });
        Subscription::new(self.clone(), topic, id)
    }

    /// Convenience wrapper that owns the closure for the caller.
    pub fn subscribe_fn<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe(topic, Arc::new(handler))
    }

    /// Remove one `(topic, handler)` pair, or every handler for `topic` when
    /// `handler` is `None`.
    pub fn unsubscribe(&self, topic: &str, handler: Option<&TopicHandler>) {
        let mut topics = self.registry();
        match handler {
            Some(handler) => {
                if let Some(entries) = topics.get_mut(topic) {
                    entries.retain(|entry| !Arc::ptr_eq(&entry.handler, handler));
                    if entries.is_empty() {
                        topics.remove(topic);
                    }
                }
            }
            None => {
                topics.remove(topic);
            }
        }
    }

    fn unsubscribe_id(&self, topic: &str, id: u64) {
        let mut topics = self.registry();
        if let Some(entries) = topics.get_mut(topic) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Deliver `envelope` to every handler currently registered for its
    /// topic, returning the number of handlers invoked.
    ///
    /// A handler that panics is logged and skipped; the remaining handlers
    /// still run and connection state is unaffected. Unknown topics are
    /// dropped silently.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let handlers: Vec<TopicHandler> = {
            let topics = self.registry();
            match topics.get(envelope.kind.as_str()) {
                Some(entries) => entries
                    .iter()
                    .map(|entry| Arc::clone(&entry.handler))
                    .collect(),
                None => {
                    debug!(topic = %envelope.kind, "no subscribers for inbound message");
                    return 0;
                }
            }
        };

        let mut delivered = 0usize;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    warn!(topic = %envelope.kind, "subscriber panicked during dispatch");
                }
            }
        }
        delivered
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.registry().clear();
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.registry().get(topic).map(Vec::len).unwrap_or(0)
    }
}

/// Unsubscribe guard returned by [`TopicRouter::subscribe`].
pub struct Subscription {
    router: TopicRouter,
    topic: String,
    id: u64,
    removed: AtomicBool,
}

impl Subscription {
    fn new(router: TopicRouter, topic: String, id: u64) -> Self {
        Self {
            router,
            topic,
            id,
            removed: AtomicBool::new(false),
        }
    }

    /// Remove this registration. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.router.unsubscribe_id(&self.topic, self.id);
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
