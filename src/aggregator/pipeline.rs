use tracing::trace;

use crate::config::AggregatorConfig;
use crate::correlate::Correlator;
use crate::dedup::Deduplicator;
use crate::lifecycle::{Lifecycle, LifecycleEvent, Transition};
use crate::model::{NormalizedMessage, RawEvent, SessionIdentity, SessionState};
use crate::normalize::{lifecycle_kind, normalize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Belongs to another session, or to no session at all.
    Uncorrelated,
    /// Second delivery of a message already in the transcript.
    Duplicate,
    /// Start or completion marker already honored.
    DuplicateMarker,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Append {
        message: NormalizedMessage,
        transition: Option<Transition>,
        state: SessionState,
    },
    Drop(DropReason),
}

impl Decision {
    pub fn is_append(&self) -> bool {
        matches!(self, Decision::Append { .. })
    }
}

/// Per-session processing: correlate, normalize, dedup, advance lifecycle.
///
/// Synchronous and transport-free. One instance handles one session's events
/// strictly in arrival order.
#[derive(Debug, Clone)]
pub struct SessionPipeline {
    correlator: Correlator,
    dedup: Deduplicator,
    lifecycle: Lifecycle,
}

impl SessionPipeline {
    pub fn new(identity: SessionIdentity, config: &AggregatorConfig, fallback_enabled: bool) -> Self {
        Self {
            correlator: Correlator::new(identity, config, fallback_enabled),
            dedup: Deduplicator::new(config.dedup_window, config.dedup_history),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        self.correlator.identity()
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// # Functional Core
    /// No I/O. The caller applies the decision to the transcript.
    pub fn process(&mut self, raw: &RawEvent) -> Decision {
        let Some(confidence) = self.correlator.correlate(raw) else {
            trace!(topic = %raw.topic, "uncorrelated event");
            return Decision::Drop(DropReason::Uncorrelated);
        };

        let event = LifecycleEvent::from_kind(lifecycle_kind(raw));
        let message = normalize(raw).with_confidence(confidence);

        if self.dedup.is_duplicate(&message) {
            trace!(topic = %raw.topic, "duplicate message");
            return Decision::Drop(DropReason::Duplicate);
        }
        let tool_id = &self.correlator.identity().tool_id;
        if self.dedup.is_duplicate_marker(tool_id, event) {
            trace!(topic = %raw.topic, ?event, "duplicate marker");
            return Decision::Drop(DropReason::DuplicateMarker);
        }

        if event == LifecycleEvent::Start {
            self.correlator.note_start(raw.received_at);
        }
        let transition = self.lifecycle.apply(event);

        Decision::Append {
            message,
            transition,
            state: self.lifecycle.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Confidence, MatchReason, Topic, TopicKind};
    use serde_json::json;

    fn pipeline(fallback: bool) -> SessionPipeline {
        SessionPipeline::new(SessionIdentity::new("p1", "t1"), &AggregatorConfig::default(), fallback)
    }

    fn on(kind: TopicKind, payload: serde_json::Value) -> RawEvent {
        RawEvent::new(Topic::lifecycle(kind, "p1"), payload)
    }

    #[test]
    fn start_then_message_then_complete() {
        let mut p = pipeline(false);
        assert!(p.process(&on(TopicKind::Started, json!({"tool_id": "t1"}))).is_append());
        assert_eq!(p.state(), SessionState::Starting);
        assert!(p
            .process(&on(TopicKind::Message, json!({"tool_id": "t1", "message": "step"})))
            .is_append());
        assert_eq!(p.state(), SessionState::Active);
        match p.process(&on(TopicKind::Complete, json!({"tool_id": "t1", "result": "ok"}))) {
            Decision::Append { transition, state, .. } => {
                assert_eq!(state, SessionState::Completed);
                assert_eq!(transition.map(|t| t.from), Some(SessionState::Active));
            }
            other => panic!("expected append, got {other:?}"),
        }
    }

    #[test]
    fn other_tool_is_uncorrelated() {
        let mut p = pipeline(false);
        assert_eq!(
            p.process(&on(TopicKind::Message, json!({"tool_id": "t2", "message": "x"}))),
            Decision::Drop(DropReason::Uncorrelated)
        );
        assert_eq!(p.state(), SessionState::Idle);
    }

    #[test]
    fn second_start_is_a_duplicate_marker() {
        let mut p = pipeline(false);
        p.process(&on(TopicKind::Started, json!({"tool_id": "t1", "description": "a"})));
        assert_eq!(
            p.process(&on(TopicKind::Started, json!({"tool_id": "t1", "description": "b"}))),
            Decision::Drop(DropReason::DuplicateMarker)
        );
    }

    #[test]
    fn broadcast_copy_of_exact_message_is_duplicate() {
        let mut p = pipeline(true);
        let payload = json!({"tool_id": "t1", "message": "same", "timestamp": "2024-01-01T00:00:00Z"});
        assert!(p.process(&on(TopicKind::Message, payload.clone())).is_append());
        assert_eq!(
            p.process(&RawEvent::new(Topic::broadcast("claude-output"), payload)),
            Decision::Drop(DropReason::Duplicate)
        );
    }

    #[test]
    fn broadcast_copy_of_start_is_dropped() {
        let mut p = pipeline(true);
        let payload = json!({"tool_id": "t1", "description": "scan"});
        assert!(p.process(&on(TopicKind::Started, payload.clone())).is_append());
        assert!(!p
            .process(&RawEvent::new(Topic::broadcast("claude-output"), payload))
            .is_append());
        assert_eq!(p.state(), SessionState::Starting);
    }

    #[test]
    fn broadcast_start_seen_first_still_starts_the_session() {
        let mut p = pipeline(true);
        let payload = json!({"tool_id": "t1", "description": "scan"});
        assert!(p
            .process(&RawEvent::new(Topic::broadcast("claude-output"), payload.clone()))
            .is_append());
        assert_eq!(p.state(), SessionState::Starting);
        assert!(!p.process(&on(TopicKind::Started, payload)).is_append());
    }

    #[test]
    fn broadcast_match_is_tagged_heuristic() {
        let mut p = pipeline(true);
        match p.process(&RawEvent::new(Topic::broadcast("claude-output"), json!("t1 says hi"))) {
            Decision::Append { message, .. } => assert_eq!(
                message.provenance.confidence,
                Confidence::Heuristic(MatchReason::ToolIdMention)
            ),
            other => panic!("expected append, got {other:?}"),
        }
    }
}
