use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{SubscriptionId, Transport};
use crate::error::TransportError;
use crate::model::{RawEvent, Topic};

/// Several topic subscriptions multiplexed into one ordered inbound stream.
///
/// Owns every subscription it acquired. They are released by `close()`, or by
/// `Drop` on any other exit path (error, panic, task cancellation).
pub struct EventSource<T: Transport> {
    transport: T,
    subscriptions: Vec<(Topic, SubscriptionId)>,
    rx: mpsc::Receiver<RawEvent>,
}

impl<T: Transport> EventSource<T> {
    /// Subscribe to all `topics`. If any subscription fails, the ones already
    /// acquired are released before the error is returned.
    pub async fn subscribe(
        transport: &T,
        topics: impl IntoIterator<Item = Topic>,
        capacity: usize,
    ) -> Result<Self, TransportError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut source = Self {
            transport: transport.clone(),
            subscriptions: Vec::new(),
            rx,
        };

        for topic in topics {
            if source.subscriptions.iter().any(|(t, _)| *t == topic) {
                continue;
            }
            match transport.subscribe(&topic, tx.clone()).await {
                Ok(id) => source.subscriptions.push((topic, id)),
                Err(e) => {
                    warn!(%topic, error = %e, acquired = source.subscriptions.len(), "subscribe failed, releasing partial set");
                    if let Err(release_err) = source.release() {
                        warn!(error = %release_err, "release after partial subscribe failed");
                    }
                    return Err(e);
                }
            }
        }

        debug!(topics = source.subscriptions.len(), "event source open");
        Ok(source)
    }

    /// Next event in arrival order. `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<RawEvent> {
        self.rx.recv().await
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.subscriptions.iter().map(|(topic, _)| topic)
    }

    pub fn is_open(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Release every subscription. All are attempted even if one fails; the
    /// first failure is returned.
    pub fn close(mut self) -> Result<(), TransportError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), TransportError> {
        self.rx.close();
        let mut first_err = None;
        for (topic, id) in self.subscriptions.drain(..) {
            if let Err(e) = self.transport.unsubscribe(id) {
                warn!(%topic, subscription = %id, error = %e, "unsubscribe failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<T: Transport> Drop for EventSource<T> {
    fn drop(&mut self) {
        if !self.subscriptions.is_empty() {
            if let Err(e) = self.release() {
                warn!(error = %e, "release on drop failed");
            }
        }
    }
}
