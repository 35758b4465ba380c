use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::ids::ParentSessionId;

/// Lifecycle channels a parent session publishes for its sub-agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicKind {
    Started,
    Message,
    Output,
    Complete,
    Error,
}

impl TopicKind {
    pub const ALL: [TopicKind; 5] = [
        TopicKind::Started,
        TopicKind::Message,
        TopicKind::Output,
        TopicKind::Complete,
        TopicKind::Error,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            TopicKind::Started => "subagent-started",
            TopicKind::Message => "subagent-message",
            TopicKind::Output => "subagent-output",
            TopicKind::Complete => "subagent-complete",
            TopicKind::Error => "subagent-error",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }
}

/// A named channel on the pub/sub transport.
///
/// Lifecycle topics are parameterized by the parent session
/// (`subagent-message:{parent}`); everything else is a transport-wide
/// broadcast topic that can only be correlated heuristically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Lifecycle {
        kind: TopicKind,
        parent: ParentSessionId,
    },
    Broadcast(String),
}

impl Topic {
    pub fn lifecycle(kind: TopicKind, parent: impl Into<ParentSessionId>) -> Self {
        Topic::Lifecycle {
            kind,
            parent: parent.into(),
        }
    }

    pub fn broadcast(name: impl Into<String>) -> Self {
        Topic::Broadcast(name.into())
    }

    /// Every lifecycle topic for one parent session.
    pub fn all_for(parent: &ParentSessionId) -> Vec<Topic> {
        TopicKind::ALL
            .into_iter()
            .map(|kind| Topic::lifecycle(kind, parent.clone()))
            .collect()
    }

    /// Parse a wire topic name. Never fails: unknown names are broadcast topics.
    pub fn parse(name: &str) -> Self {
        if let Some((prefix, parent)) = name.split_once(':') {
            if let Some(kind) = TopicKind::from_prefix(prefix) {
                if !parent.is_empty() {
                    return Topic::lifecycle(kind, parent);
                }
            }
        }
        Topic::Broadcast(name.to_string())
    }

    pub fn kind(&self) -> Option<TopicKind> {
        match self {
            Topic::Lifecycle { kind, .. } => Some(*kind),
            Topic::Broadcast(_) => None,
        }
    }

    pub fn parent(&self) -> Option<&ParentSessionId> {
        match self {
            Topic::Lifecycle { parent, .. } => Some(parent),
            Topic::Broadcast(_) => None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Topic::Broadcast(_))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Lifecycle { kind, parent } => write!(f, "{}:{}", kind.prefix(), parent),
            Topic::Broadcast(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for Topic {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Topic::parse(s))
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Topic::parse(&name))
    }
}

/// An event exactly as the transport delivered it. The payload is untrusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub topic: Topic,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(topic: Topic, payload: Value) -> Self {
        Self {
            topic,
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}
