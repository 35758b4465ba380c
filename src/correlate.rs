//! Decides whether a raw event belongs to the tracked sub-agent session.
//!
//! Two strategies, kept apart on purpose:
//! - exact: lifecycle topic of our parent session, tool id equal or absent;
//! - heuristic: broadcast topics only, by tool id mention, parent session
//!   fragment, or proximity to the last accepted start event.
//!
//! The session fragment is the tail of the parent id. Ids tend to share a
//! prefix (`session-`, a date) and differ at the end.
//!
//! Heuristic matches favor recall and will occasionally attribute a stray
//! event. They are tagged with `Confidence::Heuristic` so consumers can tell.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::AggregatorConfig;
use crate::model::{Confidence, MatchReason, RawEvent, SessionIdentity, Topic};

const TOOL_ID_KEYS: [&str; 3] = ["tool_id", "toolId", "parent_tool_use_id"];

/// Tool id a payload claims to belong to, if it names one.
///
/// `subagent_id` is the composite `{parent}:{tool}` form; the parent prefix
/// is stripped when it matches.
pub fn claimed_tool_id<'a>(payload: &'a Value, parent: &str) -> Option<&'a str> {
    for key in TOOL_ID_KEYS {
        if let Some(id) = payload.get(key).and_then(Value::as_str) {
            if !id.is_empty() {
                return Some(id);
            }
        }
    }

    let composite = payload.get("subagent_id").and_then(Value::as_str)?;
    Some(
        composite
            .strip_prefix(parent)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(composite),
    )
}

/// Searchable text of a payload: the string itself, or its JSON rendering.
fn payload_text(payload: &Value) -> Cow<'_, str> {
    match payload {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct Correlator {
    identity: SessionIdentity,
    fallback_enabled: bool,
    fallback_window: chrono::Duration,
    session_fragment: String,
    last_start_at: Option<DateTime<Utc>>,
}

impl Correlator {
    pub fn new(identity: SessionIdentity, config: &AggregatorConfig, fallback_enabled: bool) -> Self {
        let parent = identity.parent_session_id.as_str();
        let skip = parent.chars().count().saturating_sub(config.session_fragment_len);
        let session_fragment = parent.chars().skip(skip).collect();
        Self {
            identity,
            fallback_enabled,
            fallback_window: chrono::Duration::from_std(config.fallback_window)
                .unwrap_or(chrono::Duration::zero()),
            session_fragment,
            last_start_at: None,
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Record an accepted start event; opens the timing window for fallback matches.
    pub fn note_start(&mut self, at: DateTime<Utc>) {
        self.last_start_at = Some(at);
    }

    pub fn matches(&self, raw: &RawEvent) -> bool {
        self.correlate(raw).is_some()
    }

    /// `None` means the event does not belong to this session.
    ///
    /// # Functional Core
    /// Pure function of the event and the last accepted start.
    pub fn correlate(&self, raw: &RawEvent) -> Option<Confidence> {
        match &raw.topic {
            Topic::Lifecycle { parent, .. } => self.exact(parent.as_str(), &raw.payload),
            Topic::Broadcast(_) if self.fallback_enabled => self.heuristic(raw),
            Topic::Broadcast(_) => None,
        }
    }

    fn exact(&self, parent: &str, payload: &Value) -> Option<Confidence> {
        if parent != self.identity.parent_session_id.as_str() {
            return None;
        }
        match claimed_tool_id(payload, parent) {
            Some(id) if id != self.identity.tool_id.as_str() => None,
            _ => Some(Confidence::Exact),
        }
    }

    fn heuristic(&self, raw: &RawEvent) -> Option<Confidence> {
        let tool_id = self.identity.tool_id.as_str();
        let parent = self.identity.parent_session_id.as_str();

        // A payload that names another tool explicitly is never ours.
        match claimed_tool_id(&raw.payload, parent) {
            Some(id) if id == tool_id => return Some(Confidence::Heuristic(MatchReason::ToolIdMention)),
            Some(_) => return None,
            None => {}
        }

        let text = payload_text(&raw.payload);
        if text.contains(tool_id) {
            return Some(Confidence::Heuristic(MatchReason::ToolIdMention));
        }
        if !self.session_fragment.is_empty() && text.contains(self.session_fragment.as_str()) {
            return Some(Confidence::Heuristic(MatchReason::SessionFragment));
        }
        if self.within_start_window(raw.received_at) {
            return Some(Confidence::Heuristic(MatchReason::StartWindow));
        }
        None
    }

    fn within_start_window(&self, at: DateTime<Utc>) -> bool {
        match self.last_start_at {
            Some(start) => {
                let elapsed = at - start;
                elapsed >= chrono::Duration::zero() && elapsed <= self.fallback_window
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TopicKind;
    use serde_json::json;
    use std::time::Duration;

    fn correlator(fallback: bool) -> Correlator {
        Correlator::new(
            SessionIdentity::new("session-abcdef123456", "toolu_1"),
            &AggregatorConfig::default(),
            fallback,
        )
    }

    fn lifecycle(parent: &str, payload: Value) -> RawEvent {
        RawEvent::new(Topic::lifecycle(TopicKind::Message, parent), payload)
    }

    fn broadcast(payload: Value) -> RawEvent {
        RawEvent::new(Topic::broadcast("claude-output"), payload)
    }

    #[test]
    fn exact_topic_with_matching_tool_id() {
        let c = correlator(false);
        let raw = lifecycle("session-abcdef123456", json!({"tool_id": "toolu_1"}));
        assert_eq!(c.correlate(&raw), Some(Confidence::Exact));
    }

    #[test]
    fn exact_topic_without_tool_id_is_accepted() {
        let c = correlator(false);
        let raw = lifecycle("session-abcdef123456", json!({"message": "hi"}));
        assert!(c.matches(&raw));
    }

    #[test]
    fn exact_topic_with_other_tool_id_is_rejected() {
        let c = correlator(true);
        let raw = lifecycle("session-abcdef123456", json!({"tool_id": "toolu_2"}));
        assert!(!c.matches(&raw));
    }

    #[test]
    fn other_parent_is_rejected() {
        let c = correlator(true);
        let raw = lifecycle("other", json!({"tool_id": "toolu_1"}));
        assert!(!c.matches(&raw));
    }

    #[test]
    fn composite_subagent_id_is_unwrapped() {
        let c = correlator(false);
        let ours = lifecycle(
            "session-abcdef123456",
            json!({"subagent_id": "session-abcdef123456:toolu_1"}),
        );
        let theirs = lifecycle(
            "session-abcdef123456",
            json!({"subagent_id": "session-abcdef123456:toolu_9"}),
        );
        assert!(c.matches(&ours));
        assert!(!c.matches(&theirs));
    }

    #[test]
    fn broadcast_ignored_without_fallback() {
        let c = correlator(false);
        assert!(!c.matches(&broadcast(json!("working on toolu_1"))));
    }

    #[test]
    fn broadcast_tool_id_mention() {
        let c = correlator(true);
        assert_eq!(
            c.correlate(&broadcast(json!("working on toolu_1"))),
            Some(Confidence::Heuristic(MatchReason::ToolIdMention))
        );
    }

    #[test]
    fn broadcast_session_fragment() {
        let c = correlator(true);
        assert_eq!(
            c.correlate(&broadcast(json!({"note": "from ef123456"}))),
            Some(Confidence::Heuristic(MatchReason::SessionFragment))
        );
    }

    #[test]
    fn shared_id_prefix_is_not_a_fragment_match() {
        let c = correlator(true);
        assert!(!c.matches(&broadcast(json!({"note": "session-zzzzzz999999 started"}))));
    }

    #[test]
    fn broadcast_naming_another_tool_is_rejected() {
        let mut c = correlator(true);
        c.note_start(Utc::now());
        assert!(!c.matches(&broadcast(json!({"tool_id": "toolu_2", "text": "ef123456"}))));
    }

    #[test]
    fn broadcast_within_start_window() {
        let mut c = correlator(true);
        let start = Utc::now();
        c.note_start(start);

        let raw = broadcast(json!("unrelated text")).with_received_at(start + chrono::Duration::milliseconds(500));
        assert_eq!(
            c.correlate(&raw),
            Some(Confidence::Heuristic(MatchReason::StartWindow))
        );

        let late = broadcast(json!("unrelated text")).with_received_at(start + chrono::Duration::seconds(10));
        assert!(!c.matches(&late));
    }

    #[test]
    fn broadcast_before_start_is_outside_window() {
        let mut c = correlator(true);
        let start = Utc::now();
        c.note_start(start);
        let early = broadcast(json!("noise")).with_received_at(start - chrono::Duration::seconds(1));
        assert!(!c.matches(&early));
    }

    #[test]
    fn zero_fragment_len_disables_fragment_match() {
        let config = AggregatorConfig {
            session_fragment_len: 0,
            fallback_window: Duration::ZERO,
            ..AggregatorConfig::default()
        };
        let c = Correlator::new(SessionIdentity::new("p1", "t1"), &config, true);
        assert!(!c.matches(&broadcast(json!("nothing relevant"))));
    }
}
