//! In-process publish/subscribe transport.
//!
//! Aggregators never publish; they only subscribe. Each subscriber hands the
//! bus a sink, and one `publish` call fans out synchronously to every sink
//! registered on the topic, so a subscriber watching several topics sees
//! events in exact publish order.

mod source;

pub use source::EventSource;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::model::{RawEvent, Topic};

/// Receiving end handed to the transport when subscribing.
pub type EventSink = mpsc::Sender<RawEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Seam between the aggregator and whatever pub/sub system carries events.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Register `sink` on `topic`. May suspend for a transport round-trip.
    fn subscribe(
        &self,
        topic: &Topic,
        sink: EventSink,
    ) -> impl Future<Output = Result<SubscriptionId, TransportError>> + Send;

    /// Release one subscription. Other subscribers of the same topic are unaffected.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError>;
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribe_calls: u64,
    topics: HashMap<Topic, Vec<(SubscriptionId, EventSink)>>,
    index: HashMap<SubscriptionId, Topic>,
}

/// Shared broadcast bus. Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct LocalBus {
    registry: Arc<Mutex<Registry>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `payload` to every current subscriber of `topic`.
    ///
    /// Returns the number of sinks that accepted the event. Subscribers whose
    /// queue is full miss the event; the bus never blocks a publisher.
    pub fn publish(&self, topic: &Topic, payload: Value) -> usize {
        let registry = self.registry();
        let Some(subscribers) = registry.topics.get(topic) else {
            trace!(%topic, "publish with no subscribers");
            return 0;
        };

        let event = RawEvent::new(topic.clone(), payload);
        let mut delivered = 0;
        for (id, sink) in subscribers {
            match sink.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%topic, subscription = %id, "subscriber queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(%topic, subscription = %id, "subscriber gone");
                }
            }
        }
        delivered
    }

    /// Convenience for publishing on a topic given by its wire name.
    pub fn publish_named(&self, topic: &str, payload: Value) -> usize {
        self.publish(&Topic::parse(topic), payload)
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry().topics.get(topic).map_or(0, Vec::len)
    }

    /// Number of topics with at least one live subscriber.
    pub fn topic_count(&self) -> usize {
        self.registry().topics.len()
    }

    /// Total subscribe calls ever served, including released ones.
    pub fn subscribe_calls(&self) -> u64 {
        self.registry().subscribe_calls
    }

    fn register(&self, topic: &Topic, sink: EventSink) -> SubscriptionId {
        let mut registry = self.registry();
        registry.next_id += 1;
        registry.subscribe_calls += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .topics
            .entry(topic.clone())
            .or_default()
            .push((id, sink));
        registry.index.insert(id, topic.clone());
        debug!(%topic, subscription = %id, "subscribed");
        id
    }
}

impl Transport for LocalBus {
    fn subscribe(
        &self,
        topic: &Topic,
        sink: EventSink,
    ) -> impl Future<Output = Result<SubscriptionId, TransportError>> + Send {
        std::future::ready(Ok(self.register(topic, sink)))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), TransportError> {
        let mut registry = self.registry();
        let topic = registry
            .index
            .remove(&id)
            .ok_or(TransportError::UnknownSubscription(id.as_u64()))?;

        if let Some(subscribers) = registry.topics.get_mut(&topic) {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
            if subscribers.is_empty() {
                registry.topics.remove(&topic);
            }
        }
        debug!(%topic, subscription = %id, "unsubscribed");
        Ok(())
    }
}

impl fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry();
        f.debug_struct("LocalBus")
            .field("topics", &registry.topics.len())
            .field("subscriptions", &registry.index.len())
            .finish()
    }
}
