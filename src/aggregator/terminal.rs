use chrono::Utc;
use serde_json::Value;

use crate::model::{MessageKind, NormalizedMessage, Provenance, Subtype};
use crate::normalize::{parse_timestamp, text_of};

/// Outcome of a sub-agent that finished before anyone started watching it.
///
/// Accepts whatever shape the host recorded: a bare string, or an object with
/// `content`, `output` or `text`. An object flagged `is_error` or carrying an
/// `error` field resolves the session as errored.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalResult {
    value: Value,
}

impl TerminalResult {
    pub fn from_value(value: Value) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_error(&self) -> bool {
        let flagged = self
            .value
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let has_error = self.value.get("error").is_some_and(|e| !e.is_null());
        flagged || has_error
    }

    /// The single transcript entry standing in for the whole run.
    pub fn summary(&self) -> NormalizedMessage {
        let timestamp = self
            .value
            .get("timestamp")
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        let (kind, subtype) = if self.is_error() {
            (MessageKind::System, Subtype::Error)
        } else {
            (MessageKind::Result, Subtype::Completed)
        };

        let msg = NormalizedMessage::new(kind, timestamp)
            .with_subtype(subtype)
            .with_provenance(Provenance::synthesized());
        match text_of(&self.value) {
            Some(text) => msg.with_text(text),
            None => msg.with_structured(self.value.clone()),
        }
    }
}

impl From<Value> for TerminalResult {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl From<&str> for TerminalResult {
    fn from(text: &str) -> Self {
        Self::from_value(Value::String(text.to_string()))
    }
}

impl From<String> for TerminalResult {
    fn from(text: String) -> Self {
        Self::from_value(Value::String(text))
    }
}
