//! Suppresses the second delivery of one logical event.
//!
//! The same event routinely arrives twice: once on the exact lifecycle topic
//! and once on the broadcast safety net. Messages are fingerprinted by kind,
//! subtype, content hash and a coarse timestamp bucket; a fingerprint seen in
//! the same or an adjacent bucket is a duplicate.
//!
//! Only the most recent fingerprints are kept. Both deliveries of one event
//! arrive close together, so a long-lived session does not need its whole
//! history to catch them.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::lifecycle::LifecycleEvent;
use crate::model::{MessageKind, NormalizedMessage, Subtype, ToolId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub kind: MessageKind,
    pub subtype: Option<Subtype>,
    pub bucket: i64,
    pub content_hash: u64,
}

impl Fingerprint {
    fn in_bucket(&self, bucket: i64) -> Self {
        Self {
            bucket,
            ..self.clone()
        }
    }
}

/// SHA-256 over text and structured content, truncated to 64 bits.
pub fn content_hash(msg: &NormalizedMessage) -> u64 {
    let mut hasher = Sha256::new();
    if let Some(text) = &msg.text {
        hasher.update(b"t:");
        hasher.update(text.as_bytes());
    }
    hasher.update(b"\n");
    if let Some(content) = &msg.structured_content {
        hasher.update(b"s:");
        hasher.update(content.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[derive(Debug, Clone)]
pub struct Deduplicator {
    window_ms: i64,
    history: usize,
    seen: HashSet<Fingerprint>,
    order: VecDeque<Fingerprint>,
    markers: HashSet<(ToolId, LifecycleEvent)>,
}

impl Deduplicator {
    pub fn new(window: Duration, history: usize) -> Self {
        Self {
            window_ms: (window.as_millis() as i64).max(1),
            history: history.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
            markers: HashSet::new(),
        }
    }

    pub fn fingerprint(&self, msg: &NormalizedMessage) -> Fingerprint {
        Fingerprint {
            kind: msg.kind,
            subtype: msg.subtype.clone(),
            bucket: msg.timestamp.timestamp_millis().div_euclid(self.window_ms),
            content_hash: content_hash(msg),
        }
    }

    /// Check-and-record in one step. Returns `true` if `msg` was seen already.
    pub fn is_duplicate(&mut self, msg: &NormalizedMessage) -> bool {
        let fp = self.fingerprint(msg);
        let seen_nearby = [fp.bucket - 1, fp.bucket, fp.bucket + 1]
            .into_iter()
            .any(|bucket| self.seen.contains(&fp.in_bucket(bucket)));
        if seen_nearby {
            return true;
        }
        if self.order.len() == self.history {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(fp.clone());
        self.order.push_back(fp);
        false
    }

    /// Identity-based dedup for start/complete markers. Other events are
    /// never marker duplicates.
    pub fn is_duplicate_marker(&mut self, tool_id: &ToolId, event: LifecycleEvent) -> bool {
        if !event.is_marker() {
            return false;
        }
        !self.markers.insert((tool_id.clone(), event))
    }

    /// Number of distinct fingerprints recorded.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
