use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use super::event::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    System,
    Assistant,
    User,
    Result,
}

impl MessageKind {
    /// Map a producer's `type` string. Unknown strings yield `None`.
    pub fn from_type_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Some(MessageKind::System),
            "assistant" => Some(MessageKind::Assistant),
            "user" | "human" => Some(MessageKind::User),
            "result" => Some(MessageKind::Result),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::System => "system",
            MessageKind::Assistant => "assistant",
            MessageKind::User => "user",
            MessageKind::Result => "result",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subtype {
    Started,
    Thinking,
    Status,
    Completed,
    Error,
    Other(String),
}

impl Subtype {
    pub fn parse(s: &str) -> Self {
        match s {
            "started" => Subtype::Started,
            "thinking" | "subagent_thinking" => Subtype::Thinking,
            "status" => Subtype::Status,
            "completed" | "success" => Subtype::Completed,
            "error" => Subtype::Error,
            other => Subtype::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Subtype::Started => "started",
            Subtype::Thinking => "thinking",
            Subtype::Status => "status",
            Subtype::Completed => "completed",
            Subtype::Error => "error",
            Subtype::Other(s) => s,
        }
    }
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Subtype {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Subtype {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Subtype::parse(&s))
    }
}

/// Why a broadcast event was attributed to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ToolIdMention,
    SessionFragment,
    StartWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Lifecycle topic of the right parent with a matching (or absent) tool id.
    Exact,
    /// Best-effort fallback match on a broadcast topic.
    Heuristic(MatchReason),
    /// Synthesized locally, never seen on the wire.
    Synthesized,
}

impl Confidence {
    pub fn is_exact(self) -> bool {
        matches!(self, Confidence::Exact)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub topic: Option<Topic>,
    pub confidence: Confidence,
}

impl Provenance {
    pub fn from_topic(topic: Topic) -> Self {
        Self {
            topic: Some(topic),
            confidence: Confidence::Exact,
        }
    }

    pub fn synthesized() -> Self {
        Self {
            topic: None,
            confidence: Confidence::Synthesized,
        }
    }
}

/// Canonical transcript entry. Raw payloads never reach the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<Subtype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub provenance: Provenance,
}

impl NormalizedMessage {
    pub fn new(kind: MessageKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            subtype: None,
            text: None,
            structured_content: None,
            timestamp,
            provenance: Provenance::synthesized(),
        }
    }

    pub fn with_subtype(mut self, subtype: Subtype) -> Self {
        self.subtype = Some(subtype);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_structured(mut self, content: Value) -> Self {
        self.structured_content = Some(content);
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.provenance.confidence = confidence;
        self
    }

    /// Text to show for this entry. Falls back to the structured content
    /// verbatim so uninterpretable entries still render.
    pub fn display_text(&self) -> String {
        match (&self.text, &self.structured_content) {
            (Some(text), _) => text.clone(),
            (None, Some(content)) => content.to_string(),
            (None, None) => String::new(),
        }
    }
}
